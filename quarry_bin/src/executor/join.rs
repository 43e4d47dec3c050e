//! Nested-loop join: the right side is materialised once, the left side
//! streams. Join predicates are evaluated against the combined row, so
//! conditions referencing both sides filter correctly.

use super::{Executor, Row};
use crate::errors::QueryError;
use crate::planner::{BoundCond, OutputCol};

pub struct NestedLoopJoinExec<'a> {
    schema: Vec<OutputCol>,
    conds: Vec<BoundCond>,
    left: Box<dyn Executor + 'a>,
    right_rows: Vec<Row>,
    current_left: Option<Row>,
    right_pos: usize,
}

impl<'a> NestedLoopJoinExec<'a> {
    pub fn new(
        schema: Vec<OutputCol>,
        left: Box<dyn Executor + 'a>,
        mut right: Box<dyn Executor + 'a>,
        conds: Vec<BoundCond>,
    ) -> Result<Self, QueryError> {
        let mut right_rows = Vec::new();
        while let Some(row) = right.next()? {
            right_rows.push(row);
        }
        Ok(Self {
            schema,
            conds,
            left,
            right_rows,
            current_left: None,
            right_pos: 0,
        })
    }
}

impl Executor for NestedLoopJoinExec<'_> {
    fn schema(&self) -> &[OutputCol] {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, QueryError> {
        loop {
            if self.current_left.is_none() {
                self.current_left = self.left.next()?;
                self.right_pos = 0;
                if self.current_left.is_none() {
                    return Ok(None);
                }
            }
            let left_row = self.current_left.as_ref().unwrap();

            while self.right_pos < self.right_rows.len() {
                let right_row = &self.right_rows[self.right_pos];
                self.right_pos += 1;

                let mut combined = Vec::with_capacity(left_row.len() + right_row.len());
                combined.extend_from_slice(left_row);
                combined.extend_from_slice(right_row);

                let mut ok = true;
                for cond in &self.conds {
                    if !cond.eval(&combined)? {
                        ok = false;
                        break;
                    }
                }
                if ok {
                    return Ok(Some(combined));
                }
            }
            self.current_left = None;
        }
    }
}
