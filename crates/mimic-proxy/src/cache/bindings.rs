//! Capture values bound while walking the match tree.

use crate::field::PatternField;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::Arc;

/// Owned snapshot of one regex match: every group value plus the group names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldCapture {
    groups: Vec<Option<String>>,
    names: HashMap<String, usize>,
}

impl FieldCapture {
    pub fn from_captures(regex: &Regex, captures: &Captures<'_>) -> Self {
        let groups = captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect();
        let names = regex
            .capture_names()
            .enumerate()
            .filter_map(|(index, name)| name.map(|name| (name.to_string(), index)))
            .collect();
        Self { groups, names }
    }

    /// Value of a named group, or of a numeric group index when no group has
    /// that name. A named group that did not take part in the match is `None`.
    pub fn get(&self, variable: &str) -> Option<&str> {
        let index = match self.names.get(variable) {
            Some(index) => *index,
            None => variable.parse::<usize>().ok()?,
        };
        self.groups.get(index)?.as_deref()
    }

    /// The whole match.
    pub fn matched(&self) -> &str {
        self.groups
            .first()
            .and_then(|group| group.as_deref())
            .unwrap_or_default()
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}

/// Per-field captures accumulated along one branch of the tree.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    fields: [Option<Arc<FieldCapture>>; 8],
}

impl Bindings {
    pub fn bind(&mut self, field: PatternField, capture: FieldCapture) {
        self.fields[field.index()] = Some(Arc::new(capture));
    }

    pub(crate) fn bind_shared(&mut self, field: PatternField, capture: Arc<FieldCapture>) {
        self.fields[field.index()] = Some(capture);
    }

    pub(crate) fn unbind(&mut self, field: PatternField) {
        self.fields[field.index()] = None;
    }

    pub fn field(&self, field: PatternField) -> Option<&FieldCapture> {
        self.fields[field.index()].as_deref()
    }

    /// Resolve a template variable.
    ///
    /// `FIELD:name` looks only at that field's captures; an unknown field
    /// resolves to nothing. A bare name is tried against every field in tree
    /// order and the first field yielding a value wins.
    pub fn lookup(&self, variable: &str) -> Option<&str> {
        match variable.split_once(':') {
            Some((field, name)) if !field.is_empty() => {
                let field = field.parse::<PatternField>().ok()?;
                self.field(field)?.get(name)
            }
            _ => PatternField::ALL
                .iter()
                .find_map(|field| self.field(*field)?.get(variable)),
        }
    }
}
