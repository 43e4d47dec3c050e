//! Materialising sort over the child's full output.

use super::{Executor, Row};
use crate::errors::QueryError;
use crate::planner::OutputCol;
use std::cmp::Ordering;

pub struct SortExec<'a> {
    schema: Vec<OutputCol>,
    child: Box<dyn Executor + 'a>,
    /// `(column, descending)` pairs, most significant first.
    keys: Vec<(usize, bool)>,
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl<'a> SortExec<'a> {
    pub fn new(
        schema: Vec<OutputCol>,
        child: Box<dyn Executor + 'a>,
        keys: Vec<(usize, bool)>,
    ) -> Self {
        Self {
            schema,
            child,
            keys,
            sorted: None,
        }
    }

    fn materialise(&mut self) -> Result<(), QueryError> {
        let mut rows = Vec::new();
        while let Some(row) = self.child.next()? {
            rows.push(row);
        }
        let keys = self.keys.clone();
        // Same-typed columns always compare cleanly; the binder rejected
        // anything else.
        rows.sort_by(|a, b| {
            for &(col, desc) in &keys {
                let ord = a[col].compare(&b[col]).unwrap_or(Ordering::Equal);
                let ord = if desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        self.sorted = Some(rows.into_iter());
        Ok(())
    }
}

impl Executor for SortExec<'_> {
    fn schema(&self) -> &[OutputCol] {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, QueryError> {
        if self.sorted.is_none() {
            self.materialise()?;
        }
        Ok(self.sorted.as_mut().unwrap().next())
    }
}
