/// One open scope level.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A named node that children nest under
    Name(String),
    /// An `@case`/`@else` block, identified by its case id. Contributes
    /// nothing to dotted names.
    Case(usize),
}

/// Stack of open scopes keyed by indentation.
///
/// A node at indent `k` closes every frame opened at indent `>= k`; the
/// frames that remain are its parents.
#[derive(Debug, Default)]
pub struct Hierarchy {
    frames: Vec<(usize, Frame)>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close frames at or deeper than `indent` and return the remaining path.
    pub fn scope(&mut self, indent: usize) -> Vec<Frame> {
        while matches!(self.frames.last(), Some((open, _)) if *open >= indent) {
            self.frames.pop();
        }
        self.frames.iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn push(&mut self, indent: usize, frame: Frame) {
        self.frames.push((indent, frame));
    }

    /// Names of the parents a node declared at `indent` nests under.
    pub fn path(&mut self, indent: usize) -> Vec<String> {
        self.scope(indent)
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Name(n) => Some(n),
                Frame::Case(_) => None,
            })
            .collect()
    }

    /// Resolve the fully qualified name of a node declared at `indent`.
    pub fn qualify(&mut self, indent: usize, name: &str) -> String {
        let mut parts = self.path(indent);
        parts.push(name.to_string());
        parts.join(".")
    }
}
