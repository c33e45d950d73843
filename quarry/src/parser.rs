//! SQL front end for the `SELECT` subset the engine evaluates.
use std::collections::BTreeSet;
use std::fmt;

use chumsky::prelude::*;

use crate::errors::ExecutionError;
use crate::types::Attribute;

#[derive(Debug, PartialEq, Clone)]
pub struct SelectStatement {
    pub distinct: bool,
    pub select_list: SelectList,
    pub from: Vec<TableReference>,
    pub where_clause: Option<Expression>,
    pub order_by: Vec<Attribute>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum SelectList {
    /// `*`
    Wildcard,
    Columns(Vec<Attribute>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct TableReference {
    pub name: String,
    pub alias: Option<String>,
}

impl TableReference {
    /// The name columns of this table are qualified with.
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOperator {
    /// The operator that keeps the comparison true when its operands swap sides.
    pub fn flip(self) -> Self {
        match self {
            BinaryOperator::Lt => BinaryOperator::Gt,
            BinaryOperator::LtEq => BinaryOperator::GtEq,
            BinaryOperator::Gt => BinaryOperator::Lt,
            BinaryOperator::GtEq => BinaryOperator::LtEq,
            other => other,
        }
    }

    pub fn compare(self, left: i32, right: i32) -> Option<bool> {
        Some(match self {
            BinaryOperator::Eq => left == right,
            BinaryOperator::NotEq => left != right,
            BinaryOperator::Lt => left < right,
            BinaryOperator::LtEq => left <= right,
            BinaryOperator::Gt => left > right,
            BinaryOperator::GtEq => left >= right,
            BinaryOperator::And | BinaryOperator::Or => return None,
        })
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum Expression {
    Literal(i32),
    Column(Attribute),
    Binary {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn column(table: &str, column: &str) -> Self {
        Expression::Column(Attribute::new(table, column))
    }

    /// The `AND`-separated parts of the expression, left to right.
    pub fn conjuncts(&self) -> Vec<&Expression> {
        match self {
            Expression::Binary {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    /// Joins the parts with `AND`; `None` when there are none.
    pub fn conjunction(parts: impl IntoIterator<Item = Expression>) -> Option<Expression> {
        parts
            .into_iter()
            .reduce(|acc, part| Expression::binary(acc, BinaryOperator::And, part))
    }

    pub fn attributes(&self) -> Vec<&Attribute> {
        match self {
            Expression::Literal(_) => Vec::new(),
            Expression::Column(attribute) => vec![attribute],
            Expression::Binary { left, right, .. } => {
                let mut found = left.attributes();
                found.extend(right.attributes());
                found
            }
        }
    }

    /// Aliases of every table the expression refers to.
    pub fn tables(&self) -> BTreeSet<String> {
        self.attributes()
            .into_iter()
            .map(|attribute| attribute.table.clone())
            .collect()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{value}"),
            Expression::Column(attribute) => write!(f, "{attribute}"),
            Expression::Binary {
                left,
                op: BinaryOperator::Or,
                right,
            } => write!(f, "({left} OR {right})"),
            Expression::Binary {
                left,
                op: BinaryOperator::And,
                right,
            } => write!(f, "{left} AND {right}"),
            Expression::Binary { left, op, right } => {
                let operand = |e: &Expression| match e {
                    Expression::Binary { .. } => format!("({e})"),
                    _ => e.to_string(),
                };
                write!(f, "{} {} {}", operand(left), op, operand(right))
            }
        }
    }
}

const RESERVED: &[&str] = &[
    "SELECT", "DISTINCT", "FROM", "WHERE", "ORDER", "BY", "AND", "OR", "AS",
];

fn keyword(word: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::ident()
        .try_map(move |ident: String, span| {
            if ident.eq_ignore_ascii_case(word) {
                Ok(())
            } else {
                Err(Simple::custom(span, format!("expected `{word}`, found `{ident}`")))
            }
        })
        .padded()
}

fn identifier() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    text::ident()
        .try_map(|ident: String, span| {
            if RESERVED.iter().any(|k| k.eq_ignore_ascii_case(&ident)) {
                Err(Simple::custom(
                    span,
                    format!("keyword `{ident}` cannot be used as an identifier"),
                ))
            } else {
                Ok(ident)
            }
        })
        .padded()
}

fn column() -> impl Parser<char, Attribute, Error = Simple<char>> + Clone {
    identifier()
        .then_ignore(just('.'))
        .then(identifier())
        .map(|(table, column)| Attribute::new(table, column))
}

fn expression() -> impl Parser<char, Expression, Error = Simple<char>> + Clone {
    let number = just('-')
        .or_not()
        .chain::<char, _, _>(text::int(10))
        .collect::<String>()
        .try_map(|digits: String, span| {
            digits
                .parse::<i32>()
                .map(Expression::Literal)
                .map_err(|e| Simple::custom(span, format!("integer literal {digits}: {e}")))
        })
        .padded();

    recursive(|expr| {
        let atom = number
            .or(column().map(Expression::Column))
            .or(expr.delimited_by(just('(').padded(), just(')').padded()));

        let op = choice((
            just("<=").to(BinaryOperator::LtEq),
            just(">=").to(BinaryOperator::GtEq),
            just("<>").to(BinaryOperator::NotEq),
            just("!=").to(BinaryOperator::NotEq),
            just("=").to(BinaryOperator::Eq),
            just("<").to(BinaryOperator::Lt),
            just(">").to(BinaryOperator::Gt),
        ))
        .padded();

        let comparison = atom
            .clone()
            .then(op.then(atom).or_not())
            .map(|(left, rest)| match rest {
                Some((op, right)) => Expression::binary(left, op, right),
                None => left,
            });

        let conjunction = comparison
            .clone()
            .then(keyword("AND").ignore_then(comparison).repeated())
            .foldl(|left, right| Expression::binary(left, BinaryOperator::And, right));

        conjunction
            .clone()
            .then(keyword("OR").ignore_then(conjunction).repeated())
            .foldl(|left, right| Expression::binary(left, BinaryOperator::Or, right))
    })
}

fn select_statement() -> impl Parser<char, SelectStatement, Error = Simple<char>> {
    let comma = just(',').padded();

    let select_list = just('*')
        .padded()
        .to(SelectList::Wildcard)
        .or(column()
            .separated_by(comma.clone())
            .at_least(1)
            .map(SelectList::Columns));

    let table_reference = identifier()
        .then(keyword("AS").or_not().ignore_then(identifier()).or_not())
        .map(|(name, alias)| TableReference { name, alias });

    keyword("SELECT")
        .ignore_then(keyword("DISTINCT").or_not().map(|d| d.is_some()))
        .then(select_list)
        .then_ignore(keyword("FROM"))
        .then(table_reference.separated_by(comma.clone()).at_least(1))
        .then(keyword("WHERE").ignore_then(expression()).or_not())
        .then(
            keyword("ORDER")
                .ignore_then(keyword("BY"))
                .ignore_then(column().separated_by(comma).at_least(1))
                .or_not(),
        )
        .then_ignore(just(';').padded().or_not())
        .then_ignore(end())
        .map(
            |((((distinct, select_list), from), where_clause), order_by)| SelectStatement {
                distinct,
                select_list,
                from,
                where_clause,
                order_by: order_by.unwrap_or_default(),
            },
        )
}

/// Parses one `SELECT` statement.
pub fn parse_select(sql: &str) -> Result<SelectStatement, ExecutionError> {
    select_statement().parse(sql).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        ExecutionError::ParsingError(messages.join("; "))
    })
}

/// Splits a query file on `;` into trimmed, non-empty statements.
pub fn split_statements(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(table: &str, column: &str) -> Expression {
        Expression::column(table, column)
    }

    #[test]
    fn parses_full_statement() {
        let stmt = parse_select(
            "select distinct S.A, R.H from Sailors S, Reserves AS R \
             where S.A = R.G and R.H >= -3 order by S.A;",
        )
        .unwrap();
        assert!(stmt.distinct);
        assert_eq!(
            stmt.select_list,
            SelectList::Columns(vec![Attribute::new("S", "A"), Attribute::new("R", "H")])
        );
        assert_eq!(
            stmt.from,
            vec![
                TableReference {
                    name: "Sailors".into(),
                    alias: Some("S".into())
                },
                TableReference {
                    name: "Reserves".into(),
                    alias: Some("R".into())
                },
            ]
        );
        let expected = Expression::binary(
            Expression::binary(col("S", "A"), BinaryOperator::Eq, col("R", "G")),
            BinaryOperator::And,
            Expression::binary(col("R", "H"), BinaryOperator::GtEq, Expression::Literal(-3)),
        );
        assert_eq!(stmt.where_clause, Some(expected));
        assert_eq!(stmt.order_by, vec![Attribute::new("S", "A")]);
    }

    #[test]
    fn wildcard_without_alias_or_where() {
        let stmt = parse_select("SELECT * FROM Boats").unwrap();
        assert!(!stmt.distinct);
        assert_eq!(stmt.select_list, SelectList::Wildcard);
        assert_eq!(stmt.from[0].alias(), "Boats");
        assert_eq!(stmt.where_clause, None);
        assert!(stmt.order_by.is_empty());
    }

    #[test]
    fn operators_and_parentheses() {
        let stmt =
            parse_select("SELECT * FROM B WHERE (B.D <> 1 AND B.E != 2) AND 3 < B.F OR B.D <= 4")
                .unwrap();
        let clause = stmt.where_clause.unwrap();
        match &clause {
            Expression::Binary {
                op: BinaryOperator::Or,
                left,
                ..
            } => assert_eq!(left.conjuncts().len(), 3),
            other => panic!("expected OR at the top, got {other}"),
        }
        assert_eq!(
            clause.to_string(),
            "(B.D <> 1 AND B.E <> 2 AND 3 < B.F OR B.D <= 4)"
        );
    }

    #[test]
    fn rejects_keywords_as_names_and_trailing_garbage() {
        assert!(matches!(
            parse_select("SELECT * FROM WHERE"),
            Err(ExecutionError::ParsingError(_))
        ));
        assert!(parse_select("SELECT * FROM Boats LIMIT 3").is_err());
        assert!(parse_select("SELECT A FROM Boats").is_err());
    }

    #[test]
    fn conjunction_helpers() {
        let parts = vec![
            Expression::binary(col("S", "A"), BinaryOperator::Lt, Expression::Literal(3)),
            Expression::binary(col("S", "B"), BinaryOperator::Eq, col("R", "G")),
        ];
        let joined = Expression::conjunction(parts.clone()).unwrap();
        assert_eq!(joined.conjuncts(), parts.iter().collect::<Vec<_>>());
        assert_eq!(
            joined.tables().into_iter().collect::<Vec<_>>(),
            vec!["R".to_string(), "S".to_string()]
        );
        assert_eq!(Expression::conjunction(Vec::new()), None);
    }

    #[test]
    fn splits_query_files() {
        let text = "SELECT * FROM A;\n\n  SELECT * FROM B ;\n";
        assert_eq!(
            split_statements(text),
            vec!["SELECT * FROM A".to_string(), "SELECT * FROM B".to_string()]
        );
    }
}
