use dip_rust::{json, Dip, DipError};

use std::env;
use std::io::{self, Read};

fn main() {
    let mut json_errors = false;
    let mut file = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--json-errors" => json_errors = true,
            _ => file = Some(arg),
        }
    }

    let mut dip = Dip::new();
    let loaded = match &file {
        Some(path) => dip.from_file(path).map(|_| ()),
        None => {
            let mut input = String::new();
            match io::stdin().read_to_string(&mut input) {
                Ok(_) => {
                    dip.from_string(&input);
                    Ok(())
                }
                Err(e) => Err(DipError::reference(format!("Cannot read stdin: {}", e))),
            }
        }
    };

    match loaded.and_then(|_| dip.compile()) {
        Ok(env) => println!("{}", json::to_json_pretty(&env)),
        Err(err) => {
            report(&err, json_errors);
            std::process::exit(1);
        }
    }
}

fn report(err: &DipError, json_errors: bool) {
    if json_errors {
        eprintln!("{}", json::error_to_json(err));
        return;
    }
    for loc in &err.context {
        eprintln!("ERROR AT {} LINE {}:", loc.source, loc.line);
        eprintln!("{}", loc.code);

        // Underline the code, skipping its indentation
        let indent = loc.code.len() - loc.code.trim_start().len();
        let width = loc.code.trim().chars().count().max(1);
        let mut underline = " ".repeat(indent);
        underline.push('^');
        underline.push_str(&"_".repeat(width - 1));
        eprintln!("{}", underline);
    }
    eprintln!("{}: {}", err.kind, err.message);
    eprintln!();
}
