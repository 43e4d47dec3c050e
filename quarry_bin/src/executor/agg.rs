//! Whole-input aggregation: COUNT, MAX, MIN, SUM.

use super::{Executor, Row};
use crate::errors::QueryError;
use crate::parser::AggFunc;
use crate::planner::{BoundAgg, OutputCol};
use crate::value::{ColType, Value};
use std::cmp::Ordering;

struct AggState {
    func: AggFunc,
    arg: Option<usize>,
    output_type: ColType,
    count: i64,
    acc: Option<Value>,
}

impl AggState {
    fn update(&mut self, row: &Row) -> Result<(), QueryError> {
        self.count += 1;
        let Some(arg) = self.arg else {
            return Ok(());
        };
        let v = &row[arg];
        match self.func {
            AggFunc::Count => {}
            AggFunc::Max | AggFunc::Min => {
                let keep_new = match &self.acc {
                    None => true,
                    Some(cur) => {
                        let ord = v.compare(cur)?;
                        (self.func == AggFunc::Max && ord == Ordering::Greater)
                            || (self.func == AggFunc::Min && ord == Ordering::Less)
                    }
                };
                if keep_new {
                    self.acc = Some(v.clone());
                }
            }
            AggFunc::Sum => {
                let acc = self.acc.get_or_insert(match self.output_type {
                    ColType::Float => Value::Float(0.0),
                    _ => Value::Bigint(0),
                });
                let next = match (&*acc, v) {
                    (Value::Bigint(a), Value::Int(b)) => Value::Bigint(*a + *b as i64),
                    (Value::Bigint(a), Value::Bigint(b)) => Value::Bigint(*a + *b),
                    (Value::Float(a), Value::Float(b)) => Value::Float(*a + *b),
                    (Value::Float(a), Value::Int(b)) => Value::Float(*a + *b as f32),
                    (Value::Float(a), Value::Bigint(b)) => Value::Float(*a + *b as f32),
                    _ => {
                        return Err(QueryError::IncompatibleType {
                            lhs: "SUM".to_string(),
                            rhs: v.col_type().to_string(),
                        })
                    }
                };
                *acc = next;
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self.func {
            AggFunc::Count => Value::Int(self.count as i32),
            AggFunc::Sum => self.acc.unwrap_or(match self.output_type {
                ColType::Float => Value::Float(0.0),
                _ => Value::Bigint(0),
            }),
            AggFunc::Max | AggFunc::Min => self.acc.unwrap_or(match self.output_type {
                ColType::Float => Value::Float(0.0),
                ColType::Int => Value::Int(0),
                ColType::Bigint => Value::Bigint(0),
                ColType::Char => Value::Str(String::new()),
                ColType::Datetime => Value::Str(String::new()),
            }),
        }
    }
}

pub struct AggExec<'a> {
    schema: Vec<OutputCol>,
    child: Box<dyn Executor + 'a>,
    aggs: Vec<BoundAgg>,
    done: bool,
}

impl<'a> AggExec<'a> {
    pub fn new(schema: Vec<OutputCol>, child: Box<dyn Executor + 'a>, aggs: Vec<BoundAgg>) -> Self {
        Self {
            schema,
            child,
            aggs,
            done: false,
        }
    }
}

impl Executor for AggExec<'_> {
    fn schema(&self) -> &[OutputCol] {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, QueryError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut states: Vec<AggState> = self
            .aggs
            .iter()
            .map(|agg| AggState {
                func: agg.func,
                arg: agg.arg,
                output_type: agg.output.col_type,
                count: 0,
                acc: None,
            })
            .collect();

        let mut saw_rows = false;
        while let Some(row) = self.child.next()? {
            saw_rows = true;
            for state in &mut states {
                state.update(&row)?;
            }
        }

        // An empty input still yields a row when a COUNT or SUM wants its
        // zero; MAX/MIN over nothing suppress the row entirely.
        if !saw_rows
            && !self
                .aggs
                .iter()
                .any(|a| matches!(a.func, AggFunc::Count | AggFunc::Sum))
        {
            return Ok(None);
        }
        Ok(Some(states.into_iter().map(AggState::finish).collect()))
    }
}
