use log::trace;

use crate::error::{DipError, Result};
use crate::hierarchy::Frame;
use crate::node::CaseKind;
use crate::tokenizer::Line;

/// One nesting level of `@case`/`@else`/`@end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub id: usize,
    /// Scope path the branch was opened at
    pub path: Vec<Frame>,
    /// Case ids in declaration order
    pub cases: Vec<usize>,
    pub kinds: Vec<CaseKind>,
    /// Case of the enclosing branch this branch is nested in
    pub parent_case: Option<usize>,
}

/// One arm of a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub id: usize,
    pub path: Vec<Frame>,
    pub line: Line,
    pub expr: Option<String>,
    /// Effective truth, already combined with the enclosing case
    pub value: bool,
    pub branch_id: usize,
    pub branch_index: usize,
    pub kind: CaseKind,
}

/// State machine resolving nested conditional blocks.
///
/// Branch and case records live in side tables indexed by id; only the
/// stack of open branch ids changes as directives are processed.
#[derive(Debug, Default)]
pub struct Branching {
    branches: Vec<Branch>,
    cases: Vec<Case>,
    open: Vec<usize>,
}

impl Branching {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Process an `@case` or `@else` found at scope `path`. The expression
    /// is only evaluated when no sibling matched yet and the enclosing case
    /// is live. Returns the new case id.
    pub fn open_case(
        &mut self,
        kind: CaseKind,
        expr: Option<&str>,
        path: Vec<Frame>,
        line: &Line,
        evaluate: impl FnOnce(&str) -> Result<bool>,
    ) -> Result<usize> {
        let branch_id = self.locate(kind, &path).map_err(|e| e.at(line))?;

        let branch = &self.branches[branch_id];
        if branch.kinds.last() == Some(&CaseKind::Else) {
            return Err(DipError::syntax("No case may follow an @else in the same branch").at(line));
        }
        let matched = branch.cases.iter().any(|id| self.cases[*id].value);
        let parent = branch.parent_case.map_or(true, |id| self.cases[id].value);

        let value = match kind {
            CaseKind::Else => parent && !matched,
            _ if matched || !parent => false,
            _ => {
                let text = expr.map(expression_text).unwrap_or_default();
                match text.as_str() {
                    "true" => true,
                    "false" => false,
                    "" => return Err(DipError::syntax("Missing @case condition").at(line)),
                    text => evaluate(text).map_err(|e| e.at(line))?,
                }
            }
        };

        let id = self.cases.len();
        let branch = &mut self.branches[branch_id];
        branch.cases.push(id);
        branch.kinds.push(kind);
        self.cases.push(Case {
            id,
            path,
            line: line.clone(),
            expr: expr.map(str::to_string),
            value,
            branch_id,
            branch_index: branch.cases.len() - 1,
            kind,
        });
        trace!("case {} of branch {} resolved to {}", id, branch_id, value);
        Ok(id)
    }

    /// Find the branch a case at `path` belongs to, closing branches that
    /// cannot contain it and opening a nested one when needed.
    fn locate(&mut self, kind: CaseKind, path: &[Frame]) -> Result<usize> {
        while let Some(&top) = self.open.last() {
            let open_path = &self.branches[top].path;
            if open_path.as_slice() == path {
                return Ok(top);
            }
            if path.starts_with(open_path) {
                break;
            }
            self.open.pop();
        }
        if kind == CaseKind::Else {
            return Err(DipError::syntax("@else without a matching @case"));
        }
        let parent_case = self
            .open
            .last()
            .and_then(|id| self.branches[*id].cases.last().copied());
        let id = self.branches.len();
        self.branches.push(Branch {
            id,
            path: path.to_vec(),
            cases: Vec::new(),
            kinds: Vec::new(),
            parent_case,
        });
        self.open.push(id);
        Ok(id)
    }

    /// Process an `@end` found at scope `path`. Closes exactly one branch.
    pub fn close(&mut self, path: &[Frame], line: &Line) -> Result<()> {
        let Some(&top) = self.open.last() else {
            return Err(DipError::syntax("@end without an open branch").at(line));
        };
        if !self.branches[top].path.starts_with(path) {
            return Err(DipError::syntax("@end does not match the open branch").at(line));
        }
        self.branches[top].kinds.push(CaseKind::End);
        self.open.pop();
        Ok(())
    }

    /// Whether nodes met now are suppressed. The innermost open branch is
    /// live only if exactly one of its cases is true and it is the latest.
    pub fn is_false(&self) -> bool {
        let Some(&top) = self.open.last() else {
            return false;
        };
        let branch = &self.branches[top];
        let true_cases = branch
            .cases
            .iter()
            .filter(|id| self.cases[**id].value)
            .count();
        let latest = branch.cases.last().map_or(false, |id| self.cases[*id].value);
        !(true_cases == 1 && latest)
    }

    /// `(branch id, case id)` of the case currently in force.
    pub fn current(&self) -> Option<(usize, usize)> {
        let top = *self.open.last()?;
        let case = *self.branches[top].cases.last()?;
        Some((top, case))
    }

    /// Fails if any branch is still open.
    pub fn finish(&self) -> Result<()> {
        match self.open.last() {
            None => Ok(()),
            Some(&top) => {
                let mut err = DipError::syntax("Unclosed @case branch, expected @end");
                if let Some(first) = self.branches[top].cases.first() {
                    err = err.at(&self.cases[*first].line);
                }
                Err(err)
            }
        }
    }
}

/// Strip the optional `("...")` wrapping around a case condition.
fn expression_text(raw: &str) -> String {
    let mut text = raw.trim();
    if text.starts_with('(') && text.ends_with(')') && text.len() >= 2 {
        text = text[1..text.len() - 1].trim();
    }
    for q in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            text = &text[1..text.len() - 1];
            break;
        }
    }
    text.trim().to_string()
}
