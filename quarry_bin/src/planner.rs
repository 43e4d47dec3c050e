//! Name resolution, type checking, and plan construction.
//!
//! Binding turns parsed column references into offsets within an operator's
//! output schema and literals into typed values; planning then picks scans
//! (an index scan when a WHERE condition bounds the first column of some
//! index), stacks left-deep nested-loop joins in FROM order, and finishes
//! with sort, aggregation, projection, and limit.

use crate::catalog::{IndexMeta, SystemManager, TabMeta};
use crate::errors::QueryError;
use crate::parser::{
    AggFunc, ColRef, CompArg, CompOp, Condition, Literal, OrderByExpr, SelectItem, SelectStatement,
};
use crate::value::{is_valid_datetime, ColType, Value};

/// One column of an operator's output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputCol {
    pub table: String,
    pub name: String,
    pub col_type: ColType,
    pub len: u32,
}

/// Right-hand side of a bound condition.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundRhs {
    Value(Value),
    Column(usize),
}

/// A condition with column references resolved to schema offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCond {
    pub lhs: usize,
    pub op: CompOp,
    pub rhs: BoundRhs,
}

impl BoundCond {
    pub fn eval(&self, row: &[Value]) -> Result<bool, QueryError> {
        let rhs = match &self.rhs {
            BoundRhs::Value(v) => v,
            BoundRhs::Column(i) => &row[*i],
        };
        let ord = row[self.lhs].compare(rhs)?;
        Ok(match self.op {
            CompOp::Eq => ord.is_eq(),
            CompOp::Ne => ord.is_ne(),
            CompOp::Lt => ord.is_lt(),
            CompOp::Le => ord.is_le(),
            CompOp::Gt => ord.is_gt(),
            CompOp::Ge => ord.is_ge(),
        })
    }
}

/// Key-space bounds for an index scan. `start_strict` starts the walk
/// strictly after `start`; `end_inclusive` keeps keys equal to `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRange {
    pub start: Option<Vec<u8>>,
    pub start_strict: bool,
    pub end: Option<Vec<u8>>,
    pub end_inclusive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundAgg {
    pub func: AggFunc,
    pub arg: Option<usize>,
    pub output: OutputCol,
}

/// The operator tree for a SELECT. Every node carries its output schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    SeqScan {
        table: String,
        schema: Vec<OutputCol>,
        conds: Vec<BoundCond>,
    },
    IndexScan {
        table: String,
        schema: Vec<OutputCol>,
        index: IndexMeta,
        range: IndexRange,
        conds: Vec<BoundCond>,
    },
    Join {
        schema: Vec<OutputCol>,
        left: Box<Plan>,
        right: Box<Plan>,
        conds: Vec<BoundCond>,
    },
    Sort {
        schema: Vec<OutputCol>,
        child: Box<Plan>,
        keys: Vec<(usize, bool)>,
    },
    Agg {
        schema: Vec<OutputCol>,
        child: Box<Plan>,
        aggs: Vec<BoundAgg>,
    },
    Project {
        schema: Vec<OutputCol>,
        child: Box<Plan>,
        cols: Vec<usize>,
    },
    Limit {
        schema: Vec<OutputCol>,
        child: Box<Plan>,
        n: u64,
    },
}

impl Plan {
    pub fn schema(&self) -> &[OutputCol] {
        match self {
            Plan::SeqScan { schema, .. }
            | Plan::IndexScan { schema, .. }
            | Plan::Join { schema, .. }
            | Plan::Sort { schema, .. }
            | Plan::Agg { schema, .. }
            | Plan::Project { schema, .. }
            | Plan::Limit { schema, .. } => schema,
        }
    }
}

/// A bound INSERT: values coerced to the table's column types.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundInsert {
    pub table: String,
    pub values: Vec<Value>,
}

/// A bound DELETE or the scan half of an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundMutationScan {
    pub table: String,
    pub conds: Vec<BoundCond>,
    pub index_scan: Option<(IndexMeta, IndexRange)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundUpdate {
    pub scan: BoundMutationScan,
    /// `(column position in the table, coerced new value)`.
    pub assignments: Vec<(usize, Value)>,
}

fn table_schema(tab: &TabMeta) -> Vec<OutputCol> {
    tab.cols
        .iter()
        .map(|c| OutputCol {
            table: c.tab_name.clone(),
            name: c.name.clone(),
            col_type: c.col_type,
            len: c.len,
        })
        .collect()
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(v) => i32::try_from(*v)
            .map(Value::Int)
            .unwrap_or(Value::Bigint(*v)),
        Literal::Float(v) => Value::Float(*v as f32),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn resolve_col(schema: &[OutputCol], col: &ColRef) -> Result<usize, QueryError> {
    let mut found = None;
    for (i, out) in schema.iter().enumerate() {
        let table_matches = col.table.as_ref().is_none_or(|t| *t == out.table);
        if table_matches && out.name == col.column {
            if found.is_some() {
                return Err(QueryError::AmbiguousColumn(col.to_string()));
            }
            found = Some(i);
        }
    }
    found.ok_or_else(|| QueryError::ColumnNotFound(col.to_string()))
}

fn is_numeric(ty: ColType) -> bool {
    matches!(ty, ColType::Int | ColType::Bigint | ColType::Float)
}

fn is_stringish(ty: ColType) -> bool {
    matches!(ty, ColType::Char | ColType::Datetime)
}

/// Validates a literal against the column it is compared with, validating
/// strings into datetimes where the column demands it.
fn normalize_rhs(lhs: &OutputCol, value: Value) -> Result<Value, QueryError> {
    match (lhs.col_type, value) {
        (t, v) if is_numeric(t) && is_numeric(v.col_type()) => Ok(v),
        (ColType::Char, Value::Str(s)) => Ok(Value::Str(s)),
        (ColType::Datetime, Value::Str(s) | Value::Datetime(s)) => {
            if is_valid_datetime(&s) {
                Ok(Value::Datetime(s))
            } else {
                Err(QueryError::InvalidDatetime(s))
            }
        }
        (t, v) => Err(QueryError::IncompatibleType {
            lhs: t.to_string(),
            rhs: v.col_type().to_string(),
        }),
    }
}

fn bind_conditions(
    schema: &[OutputCol],
    conds: &[Condition],
) -> Result<Vec<BoundCond>, QueryError> {
    conds
        .iter()
        .map(|cond| {
            let lhs = resolve_col(schema, &cond.lhs)?;
            let rhs = match &cond.rhs {
                CompArg::Value(lit) => {
                    BoundRhs::Value(normalize_rhs(&schema[lhs], literal_value(lit))?)
                }
                CompArg::Column(col) => {
                    let rhs_idx = resolve_col(schema, col)?;
                    let (a, b) = (schema[lhs].col_type, schema[rhs_idx].col_type);
                    let comparable =
                        (is_numeric(a) && is_numeric(b)) || (is_stringish(a) && is_stringish(b));
                    if !comparable {
                        return Err(QueryError::IncompatibleType {
                            lhs: a.to_string(),
                            rhs: b.to_string(),
                        });
                    }
                    BoundRhs::Column(rhs_idx)
                }
            };
            Ok(BoundCond {
                lhs,
                op: cond.op,
                rhs,
            })
        })
        .collect()
}

/// Picks an index whose first column is bounded by some condition with a
/// literal right-hand side. Remaining conditions stay as residual filters.
fn choose_index(
    tab: &TabMeta,
    conds: &[BoundCond],
) -> Option<(IndexMeta, IndexRange)> {
    for index in &tab.indexes {
        let first = &index.cols[0];
        let Some(col_pos) = tab.cols.iter().position(|c| c.name == first.name) else {
            continue;
        };
        let key_len = index.col_tot_len as usize;
        let first_width = first.len as usize;

        let mut range = IndexRange {
            start: None,
            start_strict: false,
            end: None,
            end_inclusive: true,
        };
        for cond in conds {
            if cond.lhs != col_pos || cond.op == CompOp::Ne {
                continue;
            }
            let BoundRhs::Value(v) = &cond.rhs else {
                continue;
            };
            let Ok(coerced) = v.clone().coerce_to(first.col_type, first_width) else {
                continue;
            };
            let mut enc = Vec::with_capacity(key_len);
            coerced.encode_key(&mut enc, first_width);
            let mut lo = enc.clone();
            lo.resize(key_len, 0x00);
            let mut hi = enc;
            hi.resize(key_len, 0xFF);

            match cond.op {
                CompOp::Eq => {
                    raise_start(&mut range, lo, false);
                    lower_end(&mut range, hi, true);
                }
                CompOp::Ge => raise_start(&mut range, lo, false),
                CompOp::Gt => raise_start(&mut range, hi, true),
                CompOp::Le => lower_end(&mut range, hi, true),
                CompOp::Lt => lower_end(&mut range, lo, false),
                _ => {}
            }
        }
        if range.start.is_some() || range.end.is_some() {
            return Some((index.clone(), range));
        }
    }
    None
}

fn raise_start(range: &mut IndexRange, key: Vec<u8>, strict: bool) {
    let replace = match &range.start {
        None => true,
        Some(cur) => key > *cur || (key == *cur && strict && !range.start_strict),
    };
    if replace {
        range.start = Some(key);
        range.start_strict = strict;
    }
}

fn lower_end(range: &mut IndexRange, key: Vec<u8>, inclusive: bool) {
    let replace = match &range.end {
        None => true,
        Some(cur) => key < *cur || (key == *cur && !inclusive && range.end_inclusive),
    };
    if replace {
        range.end = Some(key);
        range.end_inclusive = inclusive;
    }
}

pub fn bind_insert(
    sm: &SystemManager,
    table: &str,
    literals: &[Literal],
) -> Result<BoundInsert, QueryError> {
    let tab = sm.table_meta(table)?;
    if literals.len() != tab.cols.len() {
        return Err(QueryError::InvalidValueCount {
            expected: tab.cols.len(),
            got: literals.len(),
        });
    }
    let values = tab
        .cols
        .iter()
        .zip(literals)
        .map(|(col, lit)| literal_value(lit).coerce_to(col.col_type, col.len as usize))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BoundInsert {
        table: table.to_string(),
        values,
    })
}

pub fn bind_mutation_scan(
    sm: &SystemManager,
    table: &str,
    conds: &[Condition],
) -> Result<BoundMutationScan, QueryError> {
    let tab = sm.table_meta(table)?;
    let schema = table_schema(tab);
    let conds = bind_conditions(&schema, conds)?;
    let index_scan = choose_index(tab, &conds);
    Ok(BoundMutationScan {
        table: table.to_string(),
        conds,
        index_scan,
    })
}

pub fn bind_update(
    sm: &SystemManager,
    table: &str,
    assignments: &[(String, Literal)],
    conds: &[Condition],
) -> Result<BoundUpdate, QueryError> {
    let scan = bind_mutation_scan(sm, table, conds)?;
    let tab = sm.table_meta(table)?;
    let assignments = assignments
        .iter()
        .map(|(name, lit)| {
            let pos = tab
                .cols
                .iter()
                .position(|c| c.name == *name)
                .ok_or_else(|| QueryError::ColumnNotFound(name.clone()))?;
            let col = &tab.cols[pos];
            let value = literal_value(lit).coerce_to(col.col_type, col.len as usize)?;
            Ok((pos, value))
        })
        .collect::<Result<Vec<_>, QueryError>>()?;
    Ok(BoundUpdate { scan, assignments })
}

/// Builds the full operator tree for a SELECT.
pub fn plan_select(sm: &SystemManager, stmt: &SelectStatement) -> Result<Plan, QueryError> {
    // Combined schema: every FROM table's columns, in FROM order.
    let mut tabs = Vec::with_capacity(stmt.from.len());
    let mut combined = Vec::new();
    let mut bases = Vec::with_capacity(stmt.from.len());
    for name in &stmt.from {
        let tab = sm.table_meta(name)?;
        bases.push(combined.len());
        combined.extend(table_schema(tab));
        tabs.push(tab);
    }

    let bound = bind_conditions(&combined, &stmt.selection)?;

    // A condition whose columns all fall inside one table's slice runs at
    // that table's scan; anything else joins.
    let mut per_table: Vec<Vec<BoundCond>> = vec![Vec::new(); tabs.len()];
    let mut join_conds = Vec::new();
    'conds: for cond in bound {
        for (i, tab) in tabs.iter().enumerate() {
            let lo = bases[i];
            let hi = lo + tab.cols.len();
            let inside = |idx: usize| idx >= lo && idx < hi;
            let rhs_inside = match cond.rhs {
                BoundRhs::Value(_) => true,
                BoundRhs::Column(c) => inside(c),
            };
            if inside(cond.lhs) && rhs_inside {
                let mut local = cond.clone();
                local.lhs -= lo;
                if let BoundRhs::Column(c) = &mut local.rhs {
                    *c -= lo;
                }
                per_table[i].push(local);
                continue 'conds;
            }
        }
        join_conds.push(cond);
    }

    // Scans, then left-deep joins in FROM order.
    let mut plan: Option<Plan> = None;
    for (i, tab) in tabs.iter().enumerate() {
        let schema = table_schema(tab);
        let conds = std::mem::take(&mut per_table[i]);
        let scan = match choose_index(tab, &conds) {
            Some((index, range)) => Plan::IndexScan {
                table: tab.name.clone(),
                schema,
                index,
                range,
                conds,
            },
            None => Plan::SeqScan {
                table: tab.name.clone(),
                schema,
                conds,
            },
        };
        plan = Some(match plan {
            None => scan,
            Some(left) => {
                let mut schema = left.schema().to_vec();
                schema.extend_from_slice(scan.schema());
                let covered = schema.len();
                // Attach every join condition this prefix can now evaluate.
                let (ready, rest): (Vec<_>, Vec<_>) =
                    std::mem::take(&mut join_conds).into_iter().partition(|c| {
                    let rhs_ok = match c.rhs {
                        BoundRhs::Value(_) => true,
                        BoundRhs::Column(r) => r < covered,
                    };
                    c.lhs < covered && rhs_ok
                });
                join_conds = rest;
                Plan::Join {
                    schema,
                    left: Box::new(left),
                    right: Box::new(scan),
                    conds: ready,
                }
            }
        });
    }
    let mut plan = plan.ok_or_else(|| QueryError::Internal("empty FROM".into()))?;
    if !join_conds.is_empty() {
        return Err(QueryError::Internal(
            "unplaced join condition".into(),
        ));
    }

    // Split the select list into aggregates or plain columns.
    let mut aggs = Vec::new();
    let mut plain = Vec::new();
    for item in &stmt.select_list {
        match item {
            SelectItem::Wildcard => {
                plain.extend(0..combined.len());
            }
            SelectItem::Column(col) => plain.push(resolve_col(&combined, col)?),
            SelectItem::Aggregate(agg) => {
                let arg = agg
                    .arg
                    .as_ref()
                    .map(|col| resolve_col(&combined, col))
                    .transpose()?;
                if agg.func != AggFunc::Count && arg.is_none() {
                    return Err(QueryError::Parse("only COUNT accepts `*`".into()));
                }
                if agg.func == AggFunc::Sum {
                    if let Some(arg) = arg {
                        if !is_numeric(combined[arg].col_type) {
                            return Err(QueryError::IncompatibleType {
                                lhs: "SUM".to_string(),
                                rhs: combined[arg].col_type.to_string(),
                            });
                        }
                    }
                }
                let output = bound_agg_output(agg.func, arg, &combined, agg.alias.clone());
                aggs.push(BoundAgg {
                    func: agg.func,
                    arg,
                    output,
                });
            }
        }
    }
    if !aggs.is_empty() && !plain.is_empty() {
        return Err(QueryError::Parse(
            "cannot mix aggregates and plain columns without grouping".into(),
        ));
    }

    if aggs.is_empty() {
        // ORDER BY runs before projection so it can sort on any column.
        if !stmt.order_by.is_empty() {
            let keys = stmt
                .order_by
                .iter()
                .map(|OrderByExpr { col, desc }| Ok((resolve_col(&combined, col)?, *desc)))
                .collect::<Result<Vec<_>, QueryError>>()?;
            plan = Plan::Sort {
                schema: plan.schema().to_vec(),
                child: Box::new(plan),
                keys,
            };
        }
        let schema: Vec<OutputCol> = plain.iter().map(|&i| combined[i].clone()).collect();
        plan = Plan::Project {
            schema,
            child: Box::new(plan),
            cols: plain,
        };
    } else {
        if !stmt.order_by.is_empty() {
            return Err(QueryError::Parse(
                "ORDER BY cannot be combined with aggregates".into(),
            ));
        }
        let schema: Vec<OutputCol> = aggs.iter().map(|a| a.output.clone()).collect();
        plan = Plan::Agg {
            schema,
            child: Box::new(plan),
            aggs,
        };
    }

    if let Some(n) = stmt.limit {
        plan = Plan::Limit {
            schema: plan.schema().to_vec(),
            child: Box::new(plan),
            n,
        };
    }
    Ok(plan)
}

fn bound_agg_output(
    func: AggFunc,
    arg: Option<usize>,
    schema: &[OutputCol],
    alias: Option<String>,
) -> OutputCol {
    let arg_col = arg.map(|i| &schema[i]);
    let default_name = match (func, arg_col) {
        (AggFunc::Count, None) => "COUNT(*)".to_string(),
        (AggFunc::Count, Some(c)) => format!("COUNT({})", c.name),
        (AggFunc::Max, Some(c)) => format!("MAX({})", c.name),
        (AggFunc::Min, Some(c)) => format!("MIN({})", c.name),
        (AggFunc::Sum, Some(c)) => format!("SUM({})", c.name),
        _ => func_name(func).to_string(),
    };
    let col_type = match (func, arg_col) {
        (AggFunc::Count, _) => ColType::Int,
        (AggFunc::Sum, Some(c)) => match c.col_type {
            ColType::Float => ColType::Float,
            _ => ColType::Bigint,
        },
        (_, Some(c)) => c.col_type,
        _ => ColType::Int,
    };
    let len = arg_col.map_or(4, |c| c.len).max(4);
    OutputCol {
        table: String::new(),
        name: alias.unwrap_or(default_name),
        col_type,
        len,
    }
}

fn func_name(func: AggFunc) -> &'static str {
    match func {
        AggFunc::Count => "COUNT",
        AggFunc::Max => "MAX",
        AggFunc::Min => "MIN",
        AggFunc::Sum => "SUM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{sql_parser, Statement};
    use gneiss::buffer_pool::BufferPool;
    use gneiss::disk::DiskManager;
    use gneiss::wal::LogManager;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sm_with_tables(dir: &std::path::Path) -> SystemManager {
        let disk = Arc::new(DiskManager::open(dir).unwrap());
        let log = Arc::new(LogManager::new(Arc::clone(&disk)));
        let pool = Arc::new(BufferPool::new(disk, log, 128));
        let mut sm = SystemManager::open(pool, "plandb").unwrap();
        sm.set_output_path(dir.join("output.txt"));
        sm.create_table(
            "t",
            &[
                ("a".to_string(), ColType::Int, 0),
                ("b".to_string(), ColType::Char, 8),
            ],
        )
        .unwrap();
        sm.create_table(
            "s",
            &[
                ("a".to_string(), ColType::Int, 0),
                ("c".to_string(), ColType::Float, 0),
            ],
        )
        .unwrap();
        sm.create_index("t", &["a".to_string()], None).unwrap();
        sm
    }

    fn select_stmt(sql: &str) -> SelectStatement {
        match sql_parser(sql).unwrap().remove(0) {
            Statement::Select(s) => s,
            other => panic!("not a select: {other:?}"),
        }
    }

    #[test]
    fn bounded_where_on_indexed_column_plans_an_index_scan() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        let plan = plan_select(&sm, &select_stmt("SELECT * FROM t WHERE a >= 2")).unwrap();
        let Plan::Project { child, .. } = plan else {
            panic!("expected projection on top");
        };
        let Plan::IndexScan { range, conds, .. } = *child else {
            panic!("expected index scan, got {child:?}");
        };
        assert!(range.start.is_some());
        assert!(!range.start_strict);
        assert!(range.end.is_none());
        assert_eq!(conds.len(), 1);
    }

    #[test]
    fn unindexed_or_unbounded_where_stays_sequential() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        let plan = plan_select(&sm, &select_stmt("SELECT * FROM t WHERE b = 'x'")).unwrap();
        let Plan::Project { child, .. } = plan else {
            panic!();
        };
        assert!(matches!(*child, Plan::SeqScan { .. }));

        // `<>` cannot bound a range.
        let plan = plan_select(&sm, &select_stmt("SELECT * FROM t WHERE a <> 2")).unwrap();
        let Plan::Project { child, .. } = plan else {
            panic!();
        };
        assert!(matches!(*child, Plan::SeqScan { .. }));
    }

    #[test]
    fn equality_produces_a_closed_range() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        let scan = bind_mutation_scan(
            &sm,
            "t",
            &select_stmt("SELECT * FROM t WHERE a = 5").selection,
        )
        .unwrap();
        let (_, range) = scan.index_scan.expect("index chosen");
        let start = range.start.unwrap();
        let end = range.end.unwrap();
        // Single-column key: the closed range collapses to one key.
        assert_eq!(start, end);
        assert!(!range.start_strict);
        assert!(range.end_inclusive);
        assert_eq!(start.len(), 4);
    }

    #[test]
    fn cross_table_conditions_become_join_conditions() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        let plan = plan_select(
            &sm,
            &select_stmt("SELECT t.b FROM t, s WHERE t.a = s.a AND s.c > 1"),
        )
        .unwrap();
        let Plan::Project { child, cols, .. } = plan else {
            panic!();
        };
        assert_eq!(cols, [1]);
        let Plan::Join { conds, right, .. } = *child else {
            panic!("expected join");
        };
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].lhs, 0);
        assert_eq!(conds[0].rhs, BoundRhs::Column(2));
        // The single-table condition was pushed down to s's scan.
        let Plan::SeqScan { conds: s_conds, .. } = *right else {
            panic!();
        };
        assert_eq!(s_conds.len(), 1);
    }

    #[test]
    fn ambiguous_and_unknown_columns_are_rejected() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        assert!(matches!(
            plan_select(&sm, &select_stmt("SELECT a FROM t, s")),
            Err(QueryError::AmbiguousColumn(_))
        ));
        assert!(matches!(
            plan_select(&sm, &select_stmt("SELECT missing FROM t")),
            Err(QueryError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn type_checks_guard_comparisons_and_assignments() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        assert!(matches!(
            plan_select(&sm, &select_stmt("SELECT * FROM t WHERE a = 'x'")),
            Err(QueryError::IncompatibleType { .. })
        ));
        assert!(matches!(
            bind_insert(&sm, "t", &[Literal::Int(1)]),
            Err(QueryError::InvalidValueCount {
                expected: 2,
                got: 1
            })
        ));
        assert!(matches!(
            bind_insert(
                &sm,
                "t",
                &[Literal::Int(1), Literal::Str("123456789".into())]
            ),
            Err(QueryError::StringOverflow { .. })
        ));
    }

    #[test]
    fn aggregates_cannot_mix_with_plain_columns() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        assert!(plan_select(&sm, &select_stmt("SELECT COUNT(*), a FROM t")).is_err());
        let plan = plan_select(&sm, &select_stmt("SELECT COUNT(*) AS n FROM t")).unwrap();
        let Plan::Agg { schema, .. } = plan else {
            panic!();
        };
        assert_eq!(schema[0].name, "n");
        assert_eq!(schema[0].col_type, ColType::Int);
    }

    #[test]
    fn sort_and_limit_wrap_the_pipeline() {
        let dir = tempdir().unwrap();
        let sm = sm_with_tables(dir.path());
        let plan =
            plan_select(&sm, &select_stmt("SELECT a FROM t ORDER BY a DESC LIMIT 2")).unwrap();
        let Plan::Limit { n, child, .. } = plan else {
            panic!();
        };
        assert_eq!(n, 2);
        let Plan::Project { child, .. } = *child else {
            panic!();
        };
        assert!(matches!(*child, Plan::Sort { .. }));
    }
}
