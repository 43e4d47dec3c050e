//! SQL parser: chumsky combinators over the statement grammar. Keywords are
//! case-insensitive; statements are `;`-separated.

use chumsky::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    ShowTables,
    ShowIndex {
        table: String,
    },
    Desc {
        table: String,
    },
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        table: String,
    },
    CreateIndex {
        table: String,
        columns: Vec<String>,
    },
    DropIndex {
        table: String,
        columns: Vec<String>,
    },
    Insert {
        table: String,
        values: Vec<Literal>,
    },
    Delete {
        table: String,
        selection: Vec<Condition>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Literal)>,
        selection: Vec<Condition>,
    },
    Select(SelectStatement),
    Begin,
    Commit,
    Rollback,
    Exit,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub select_list: Vec<SelectItem>,
    pub from: Vec<String>,
    pub selection: Vec<Condition>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Column(ColRef),
    Aggregate(AggExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Max,
    Min,
    Sum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggExpr {
    pub func: AggFunc,
    /// `None` is `COUNT(*)`.
    pub arg: Option<ColRef>,
    pub alias: Option<String>,
}

/// A possibly table-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColRef {
    pub table: Option<String>,
    pub column: String,
}

impl std::fmt::Display for ColRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{t}.{}", self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    Int,
    Bigint,
    Float,
    Char(usize),
    Datetime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: TypeName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompArg {
    Value(Literal),
    Column(ColRef),
}

/// One predicate of an AND-connected WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub lhs: ColRef,
    pub op: CompOp,
    pub rhs: CompArg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub col: ColRef,
    pub desc: bool,
}

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "CREATE", "DROP", "TABLE", "INDEX", "INSERT", "INTO", "VALUES",
    "DELETE", "UPDATE", "SET", "SHOW", "TABLES", "DESC", "ORDER", "BY", "ASC", "LIMIT", "AND",
    "AS", "COUNT", "MAX", "MIN", "SUM", "BEGIN", "COMMIT", "ABORT", "ROLLBACK", "EXIT", "HELP",
    "INT", "BIGINT", "FLOAT", "CHAR", "DATETIME",
];

/// Matches one keyword, case-insensitively, as a whole identifier.
fn kw(word: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::ident()
        .try_map(move |s: String, span| {
            if s.eq_ignore_ascii_case(word) {
                Ok(())
            } else {
                Err(Simple::custom(span, format!("expected `{word}`")))
            }
        })
        .padded()
}

pub fn sql_parser(input: &str) -> Result<Vec<Statement>, Vec<Simple<char>>> {
    let ident = text::ident()
        .padded()
        .try_map(|s: String, span| {
            if RESERVED.contains(&s.to_ascii_uppercase().as_str()) {
                Err(Simple::custom(
                    span,
                    format!("keyword `{s}` cannot be used as an identifier"),
                ))
            } else {
                Ok(s)
            }
        });

    let number = just('-')
        .or_not()
        .then(text::int(10))
        .then(just('.').ignore_then(text::digits(10)).or_not())
        .padded()
        .try_map(|((neg, int), frac): ((Option<char>, String), Option<String>), span| {
            let sign = if neg.is_some() { "-" } else { "" };
            match frac {
                Some(frac) => format!("{sign}{int}.{frac}")
                    .parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|e| Simple::custom(span, e.to_string())),
                None => format!("{sign}{int}")
                    .parse::<i64>()
                    .map(Literal::Int)
                    .map_err(|e| Simple::custom(span, e.to_string())),
            }
        });

    let string = just('\'')
        .ignore_then(filter(|c| *c != '\'').repeated())
        .then_ignore(just('\''))
        .collect::<String>()
        .map(Literal::Str)
        .padded();

    let literal = number.or(string);

    let colref = ident
        .then(just('.').ignore_then(ident).or_not())
        .map(|(first, second)| match second {
            Some(column) => ColRef {
                table: Some(first),
                column,
            },
            None => ColRef {
                table: None,
                column: first,
            },
        });

    let comp_op = choice((
        just("<=").to(CompOp::Le),
        just(">=").to(CompOp::Ge),
        just("<>").to(CompOp::Ne),
        just("!=").to(CompOp::Ne),
        just('=').to(CompOp::Eq),
        just('<').to(CompOp::Lt),
        just('>').to(CompOp::Gt),
    ))
    .padded();

    let condition = colref
        .clone()
        .then(comp_op)
        .then(
            literal
                .clone()
                .map(CompArg::Value)
                .or(colref.clone().map(CompArg::Column)),
        )
        .map(|((lhs, op), rhs)| Condition { lhs, op, rhs });

    let where_clause = kw("WHERE")
        .ignore_then(condition.separated_by(kw("AND")).at_least(1))
        .or_not()
        .map(Option::unwrap_or_default);

    let col_type = choice((
        kw("INT").to(TypeName::Int),
        kw("BIGINT").to(TypeName::Bigint),
        kw("FLOAT").to(TypeName::Float),
        kw("DATETIME").to(TypeName::Datetime),
        kw("CHAR")
            .ignore_then(
                text::int(10)
                    .padded()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .try_map(|n: String, span| {
                n.parse::<usize>()
                    .ok()
                    .filter(|&n| n > 0)
                    .map(TypeName::Char)
                    .ok_or_else(|| Simple::custom(span, "bad CHAR length".to_string()))
            }),
    ));

    let column_def = ident
        .then(col_type)
        .map(|(name, ty)| ColumnDef { name, ty });

    let paren_idents = ident
        .separated_by(just(',').padded())
        .at_least(1)
        .delimited_by(just('(').padded(), just(')').padded());

    let create = kw("CREATE").ignore_then(choice((
        kw("TABLE")
            .ignore_then(ident)
            .then(
                column_def
                    .separated_by(just(',').padded())
                    .at_least(1)
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .map(|(table, columns)| Statement::CreateTable { table, columns }),
        kw("INDEX")
            .ignore_then(ident)
            .then(paren_idents.clone())
            .map(|(table, columns)| Statement::CreateIndex { table, columns }),
    )));

    let drop = kw("DROP").ignore_then(choice((
        kw("TABLE")
            .ignore_then(ident)
            .map(|table| Statement::DropTable { table }),
        kw("INDEX")
            .ignore_then(ident)
            .then(paren_idents)
            .map(|(table, columns)| Statement::DropIndex { table, columns }),
    )));

    let insert = kw("INSERT")
        .ignore_then(kw("INTO"))
        .ignore_then(ident)
        .then_ignore(kw("VALUES"))
        .then(
            literal
                .clone()
                .separated_by(just(',').padded())
                .at_least(1)
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table, values)| Statement::Insert { table, values });

    let delete = kw("DELETE")
        .ignore_then(kw("FROM"))
        .ignore_then(ident)
        .then(where_clause.clone())
        .map(|(table, selection)| Statement::Delete { table, selection });

    let assignment = ident.then_ignore(just('=').padded()).then(literal.clone());
    let update = kw("UPDATE")
        .ignore_then(ident)
        .then_ignore(kw("SET"))
        .then(assignment.separated_by(just(',').padded()).at_least(1))
        .then(where_clause.clone())
        .map(|((table, assignments), selection)| Statement::Update {
            table,
            assignments,
            selection,
        });

    let agg_func = choice((
        kw("COUNT").to(AggFunc::Count),
        kw("MAX").to(AggFunc::Max),
        kw("MIN").to(AggFunc::Min),
        kw("SUM").to(AggFunc::Sum),
    ));
    let aggregate = agg_func
        .then(
            just('*')
                .padded()
                .to(None)
                .or(colref.clone().map(Some))
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .then(kw("AS").ignore_then(ident).or_not())
        .map(|((func, arg), alias)| SelectItem::Aggregate(AggExpr { func, arg, alias }));

    let select_item = choice((
        just('*').padded().to(SelectItem::Wildcard),
        aggregate,
        colref.clone().map(SelectItem::Column),
    ));

    let order_by = kw("ORDER")
        .ignore_then(kw("BY"))
        .ignore_then(
            colref
                .clone()
                .then(
                    choice((kw("ASC").to(false), kw("DESC").to(true)))
                        .or_not()
                        .map(|d| d.unwrap_or(false)),
                )
                .map(|(col, desc)| OrderByExpr { col, desc })
                .separated_by(just(',').padded())
                .at_least(1),
        )
        .or_not()
        .map(Option::unwrap_or_default);

    let limit = kw("LIMIT")
        .ignore_then(text::int(10).padded())
        .try_map(|n: String, span| {
            n.parse::<u64>()
                .map_err(|e| Simple::custom(span, e.to_string()))
        })
        .or_not();

    let select = kw("SELECT")
        .ignore_then(select_item.separated_by(just(',').padded()).at_least(1))
        .then_ignore(kw("FROM"))
        .then(ident.separated_by(just(',').padded()).at_least(1))
        .then(where_clause)
        .then(order_by)
        .then(limit)
        .map(|((((select_list, from), selection), order_by), limit)| {
            Statement::Select(SelectStatement {
                select_list,
                from,
                selection,
                order_by,
                limit,
            })
        });

    let show = kw("SHOW").ignore_then(choice((
        kw("TABLES").to(Statement::ShowTables),
        kw("INDEX")
            .ignore_then(kw("FROM"))
            .ignore_then(ident)
            .map(|table| Statement::ShowIndex { table }),
    )));

    let desc = kw("DESC")
        .ignore_then(ident)
        .map(|table| Statement::Desc { table });

    let statement = choice((
        show,
        desc,
        create,
        drop,
        insert,
        delete,
        update,
        select,
        kw("BEGIN").to(Statement::Begin),
        kw("COMMIT").to(Statement::Commit),
        kw("ABORT").to(Statement::Rollback),
        kw("ROLLBACK").to(Statement::Rollback),
        kw("EXIT").to(Statement::Exit),
        kw("HELP").to(Statement::Help),
    ));

    statement
        .separated_by(just(';').padded())
        .allow_trailing()
        .then_ignore(end())
        .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(input: &str) -> Statement {
        let mut stmts = sql_parser(input).expect("parses");
        assert_eq!(stmts.len(), 1, "expected one statement");
        stmts.remove(0)
    }

    #[test]
    fn parses_create_table_with_every_type() {
        let stmt = one("CREATE TABLE t (a INT, b BIGINT, c FLOAT, d CHAR(8), e DATETIME)");
        let Statement::CreateTable { table, columns } = stmt else {
            panic!("wrong variant");
        };
        assert_eq!(table, "t");
        let types: Vec<_> = columns.iter().map(|c| c.ty).collect();
        assert_eq!(
            types,
            [
                TypeName::Int,
                TypeName::Bigint,
                TypeName::Float,
                TypeName::Char(8),
                TypeName::Datetime
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(one("begin"), Statement::Begin);
        assert_eq!(one("Rollback"), Statement::Rollback);
        assert_eq!(one("abort"), Statement::Rollback);
        assert!(matches!(
            one("select * from t"),
            Statement::Select(_)
        ));
    }

    #[test]
    fn parses_insert_with_mixed_literals() {
        let stmt = one("INSERT INTO t VALUES (1, -2.5, 'hello', '2024-01-02 03:04:05')");
        let Statement::Insert { values, .. } = stmt else {
            panic!("wrong variant");
        };
        assert_eq!(
            values,
            [
                Literal::Int(1),
                Literal::Float(-2.5),
                Literal::Str("hello".into()),
                Literal::Str("2024-01-02 03:04:05".into())
            ]
        );
    }

    #[test]
    fn parses_select_with_where_order_limit() {
        let stmt = one("SELECT a, t.b FROM t, s WHERE a >= 2 AND t.b = s.b ORDER BY a DESC, b LIMIT 10");
        let Statement::Select(select) = stmt else {
            panic!("wrong variant");
        };
        assert_eq!(select.from, ["t", "s"]);
        assert_eq!(select.select_list.len(), 2);
        assert_eq!(select.selection.len(), 2);
        assert_eq!(select.selection[0].op, CompOp::Ge);
        assert!(matches!(
            select.selection[1].rhs,
            CompArg::Column(ref c) if c.table.as_deref() == Some("s")
        ));
        assert!(select.order_by[0].desc);
        assert!(!select.order_by[1].desc);
        assert_eq!(select.limit, Some(10));
    }

    #[test]
    fn parses_aggregates_with_aliases() {
        let stmt = one("SELECT COUNT(*) AS n, MAX(a) AS m, SUM(b) FROM t");
        let Statement::Select(select) = stmt else {
            panic!("wrong variant");
        };
        let SelectItem::Aggregate(count) = &select.select_list[0] else {
            panic!("not an aggregate");
        };
        assert_eq!(count.func, AggFunc::Count);
        assert!(count.arg.is_none());
        assert_eq!(count.alias.as_deref(), Some("n"));
        let SelectItem::Aggregate(sum) = &select.select_list[2] else {
            panic!("not an aggregate");
        };
        assert_eq!(sum.func, AggFunc::Sum);
        assert!(sum.alias.is_none());
    }

    #[test]
    fn parses_update_and_delete_with_predicates() {
        let stmt = one("UPDATE t SET b='XXXXXXXX', c=3 WHERE a=1");
        let Statement::Update {
            assignments,
            selection,
            ..
        } = stmt
        else {
            panic!("wrong variant");
        };
        assert_eq!(assignments.len(), 2);
        assert_eq!(selection.len(), 1);

        let stmt = one("DELETE FROM t");
        let Statement::Delete { selection, .. } = stmt else {
            panic!("wrong variant");
        };
        assert!(selection.is_empty());
    }

    #[test]
    fn parses_index_ddl_and_show() {
        assert_eq!(
            one("CREATE INDEX t (a, b)"),
            Statement::CreateIndex {
                table: "t".into(),
                columns: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(
            one("DROP INDEX t (a)"),
            Statement::DropIndex {
                table: "t".into(),
                columns: vec!["a".into()]
            }
        );
        assert_eq!(one("SHOW TABLES"), Statement::ShowTables);
        assert_eq!(
            one("SHOW INDEX FROM t"),
            Statement::ShowIndex { table: "t".into() }
        );
        assert_eq!(one("DESC t"), Statement::Desc { table: "t".into() });
    }

    #[test]
    fn splits_multiple_statements() {
        let stmts = sql_parser("BEGIN; INSERT INTO t VALUES (1); COMMIT;").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn rejects_keywords_as_identifiers_and_garbage() {
        assert!(sql_parser("CREATE TABLE select (a INT)").is_err());
        assert!(sql_parser("SELEC * FROM t").is_err());
        assert!(sql_parser("SELECT * FROM").is_err());
    }
}
