//! Abstract query tree and its AQL compiler.

pub mod compiler;

pub use compiler::{compile, CompiledQuery, Operation};

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AdapterError, Result};
use crate::schema::EntitySchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Collection,
    View,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub kind: SourceKind,
    pub schema: Option<Arc<EntitySchema>>,
}

impl Source {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Collection,
            schema: None,
        }
    }

    pub fn view(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::View,
            schema: None,
        }
    }

    /// Collection source bound to an entity type.
    pub fn entity(schema: Arc<EntitySchema>) -> Self {
        Self {
            name: schema.collection.clone(),
            kind: SourceKind::Collection,
            schema: Some(schema),
        }
    }

    pub fn with_schema(mut self, schema: Arc<EntitySchema>) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    pub on: Expr,
}

/// Combinator tag of a where clause. The `Search*` tags render into the `SEARCH`
/// segment, the others into `FILTER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
    SearchAnd,
    SearchOr,
}

impl BoolOp {
    pub fn is_search(self) -> bool {
        matches!(self, BoolOp::SearchAnd | BoolOp::SearchOr)
    }

    fn connective(self) -> &'static str {
        match self {
            BoolOp::And | BoolOp::SearchAnd => " && ",
            BoolOp::Or | BoolOp::SearchOr => " || ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanExpr {
    pub op: BoolOp,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub direction: Direction,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Distinct {
    Flag(bool),
    On(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Set,
    Inc,
    Push,
    Pull,
}

impl FromStr for UpdateKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set" => Ok(UpdateKind::Set),
            "inc" => Ok(UpdateKind::Inc),
            "push" => Ok(UpdateKind::Push),
            "pull" => Ok(UpdateKind::Pull),
            other => Err(AdapterError::compile(
                format!("unknown update operator `{other}`, expected one of set, inc, push, pull"),
                "update",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    pub kind: UpdateKind,
    pub field: String,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lte,
    Gte,
    Lt,
    Gt,
    And,
    Or,
    Like,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lte => "<=",
            BinOp::Gte => ">=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Like => "LIKE",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::String(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentPart {
    Raw(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field of the source at the given position (0 = root, 1.. = joins).
    Field { source: usize, name: String },
    /// A whole source row.
    Source(usize),
    /// Pinned value; the index points into `Query::params`.
    Param(usize),
    Literal(Literal),
    List(Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    IsNil(Box<Expr>),
    Call(String, Vec<Expr>),
    Fragment(Vec<FragmentPart>),
    Count(Option<Box<Expr>>),
}

pub fn field(source: usize, name: impl Into<String>) -> Expr {
    Expr::Field {
        source,
        name: name.into(),
    }
}

pub fn param(index: usize) -> Expr {
    Expr::Param(index)
}

pub fn lit(value: impl Into<Literal>) -> Expr {
    Expr::Literal(value.into())
}

pub fn null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn list<I: IntoIterator<Item = Expr>>(items: I) -> Expr {
    Expr::List(items.into_iter().collect())
}

pub fn call<I: IntoIterator<Item = Expr>>(name: impl Into<String>, args: I) -> Expr {
    Expr::Call(name.into(), args.into_iter().collect())
}

pub fn fragment<I: IntoIterator<Item = FragmentPart>>(parts: I) -> Expr {
    Expr::Fragment(parts.into_iter().collect())
}

pub fn raw(text: impl Into<String>) -> FragmentPart {
    FragmentPart::Raw(text.into())
}

/// `count(expr)`; `None` counts whole rows.
pub fn count(target: Option<Expr>) -> Expr {
    Expr::Count(target.map(Box::new))
}

impl Expr {
    fn binary(self, op: BinOp, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(self), Box::new(rhs))
    }

    pub fn equals(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Eq, rhs)
    }

    pub fn not_equals(self, rhs: Expr) -> Expr {
        self.binary(BinOp::NotEq, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Lt, rhs)
    }

    pub fn lte(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Lte, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Gt, rhs)
    }

    pub fn gte(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Gte, rhs)
    }

    pub fn and(self, rhs: Expr) -> Expr {
        self.binary(BinOp::And, rhs)
    }

    pub fn or(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Or, rhs)
    }

    pub fn like(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Like, rhs)
    }

    pub fn plus(self, rhs: Expr) -> Expr {
        self.binary(BinOp::Add, rhs)
    }

    pub fn is_in(self, rhs: Expr) -> Expr {
        Expr::In(Box::new(self), Box::new(rhs))
    }

    pub fn is_nil(self) -> Expr {
        Expr::IsNil(Box::new(self))
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl From<Expr> for FragmentPart {
    fn from(e: Expr) -> Self {
        FragmentPart::Expr(e)
    }
}

/// In-memory query tree. Built by value; every builder method returns a new tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub from: Source,
    pub joins: Vec<Join>,
    pub wheres: Vec<BooleanExpr>,
    pub group_bys: Vec<Expr>,
    pub order_bys: Vec<OrderBy>,
    pub offset: Option<Expr>,
    pub limit: Option<Expr>,
    pub select: Option<Vec<Expr>>,
    pub distinct: Option<Distinct>,
    pub updates: Vec<UpdateOp>,
    pub params: Vec<Value>,
}

impl Query {
    pub fn new(from: Source) -> Self {
        Self {
            from,
            joins: Vec::new(),
            wheres: Vec::new(),
            group_bys: Vec::new(),
            order_bys: Vec::new(),
            offset: None,
            limit: None,
            select: None,
            distinct: None,
            updates: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn join(mut self, kind: JoinKind, source: Source, on: Expr) -> Self {
        self.joins.push(Join { kind, source, on });
        self
    }

    pub fn inner_join(self, source: Source, on: Expr) -> Self {
        self.join(JoinKind::Inner, source, on)
    }

    fn clause(mut self, op: BoolOp, expr: Expr) -> Self {
        self.wheres.push(BooleanExpr { op, expr });
        self
    }

    pub fn filter(self, expr: Expr) -> Self {
        self.clause(BoolOp::And, expr)
    }

    pub fn or_filter(self, expr: Expr) -> Self {
        self.clause(BoolOp::Or, expr)
    }

    pub fn search(self, expr: Expr) -> Self {
        self.clause(BoolOp::SearchAnd, expr)
    }

    pub fn or_search(self, expr: Expr) -> Self {
        self.clause(BoolOp::SearchOr, expr)
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_bys.push(expr);
        self
    }

    pub fn order_by(mut self, expr: Expr, direction: Direction) -> Self {
        self.order_bys.push(OrderBy { direction, expr });
        self
    }

    pub fn offset(mut self, expr: Expr) -> Self {
        self.offset = Some(expr);
        self
    }

    pub fn limit(mut self, expr: Expr) -> Self {
        self.limit = Some(expr);
        self
    }

    pub fn select<I: IntoIterator<Item = Expr>>(mut self, fields: I) -> Self {
        self.select = Some(fields.into_iter().collect());
        self
    }

    pub fn distinct(mut self, flag: bool) -> Self {
        self.distinct = Some(Distinct::Flag(flag));
        self
    }

    pub fn distinct_on<I: IntoIterator<Item = Expr>>(mut self, exprs: I) -> Self {
        self.distinct = Some(Distinct::On(exprs.into_iter().collect()));
        self
    }

    pub fn update(mut self, kind: UpdateKind, field: impl Into<String>, value: Expr) -> Self {
        self.updates.push(UpdateOp {
            kind,
            field: field.into(),
            value,
        });
        self
    }

    pub fn with_params<I: IntoIterator<Item = Value>>(mut self, params: I) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    /// Append a pinned value and return the expression referring to it.
    pub fn bind(&mut self, value: impl Into<Value>) -> Expr {
        self.params.push(value.into());
        Expr::Param(self.params.len() - 1)
    }

    /// Short human-readable summary used in error messages.
    pub fn describe(&self) -> String {
        let mut out = format!("from `{}`", self.from.name);
        if self.from.kind == SourceKind::View {
            out.push_str(" (view)");
        }
        for j in &self.joins {
            let kind = format!("{:?}", j.kind).to_lowercase();
            out.push_str(&format!(", {kind} join `{}`", j.source.name));
        }
        if !self.wheres.is_empty() {
            out.push_str(&format!(", {} where clause(s)", self.wheres.len()));
        }
        if !self.group_bys.is_empty() {
            out.push_str(&format!(", {} group term(s)", self.group_bys.len()));
        }
        if !self.order_bys.is_empty() {
            out.push_str(&format!(", {} order term(s)", self.order_bys.len()));
        }
        if self.offset.is_some() {
            out.push_str(", offset");
        }
        if self.limit.is_some() {
            out.push_str(", limit");
        }
        if let Some(sel) = &self.select {
            out.push_str(&format!(", select {} expr(s)", sel.len()));
        }
        if !self.updates.is_empty() {
            out.push_str(&format!(", {} update(s)", self.updates.len()));
        }
        out
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
