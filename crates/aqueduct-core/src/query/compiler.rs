use serde_json::{Map, Value};

use super::{
    BoolOp, Direction, Distinct, Expr, FragmentPart, JoinKind, Literal, Query, SourceKind,
    UpdateKind,
};
use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Delete,
    Update,
}

/// AQL text plus the positional parameters it references as `@1`, `@2`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub text: String,
    pub params: Vec<Value>,
    /// Name of each element of the returned row arrays, in order.
    pub columns: Vec<String>,
}

impl CompiledQuery {
    pub fn bind_vars(&self) -> Map<String, Value> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1).to_string(), v.clone()))
            .collect()
    }
}

/// Compile `query` for the given operation. Either the whole text is produced or an
/// error describing the offending query is returned.
pub fn compile(query: &Query, operation: Operation) -> Result<CompiledQuery> {
    let mut ctx = Ctx::new(query)?;
    let mut out = String::new();
    ctx.from(&mut out);
    ctx.joins(&mut out)?;
    ctx.boolean(&mut out, " SEARCH ", true)?;
    ctx.boolean(&mut out, " FILTER ", false)?;

    let columns = match operation {
        Operation::Select => {
            let projection = ctx.projection()?;
            let counter = match &projection {
                Projection::Count(name) => Some(name.as_str()),
                Projection::Fields(_) => None,
            };
            let grouped_count = ctx.group_by(&mut out, counter)?;
            ctx.order_by(&mut out)?;
            ctx.offset_and_limit(&mut out)?;
            match projection {
                Projection::Count(name) => {
                    if !grouped_count {
                        out.push_str(" COLLECT WITH COUNT INTO ");
                        out.push_str(&name);
                    }
                    out.push_str(" RETURN ");
                    out.push_str(&name);
                    vec![name]
                }
                Projection::Fields(fields) => {
                    out.push_str(" RETURN ");
                    out.push_str(ctx.distinct()?);
                    ctx.array(&mut out, &fields)?;
                    columns_of(&fields)
                }
            }
        }
        Operation::Delete => {
            ctx.ensure_mutable("delete")?;
            ctx.order_by(&mut out)?;
            ctx.offset_and_limit(&mut out)?;
            out.push_str(&format!(" REMOVE {} IN `{}`", ctx.aliases[0], query.from.name));
            ctx.returning(&mut out, "OLD")?
        }
        Operation::Update => {
            ctx.ensure_mutable("update")?;
            ctx.order_by(&mut out)?;
            ctx.offset_and_limit(&mut out)?;
            ctx.update(&mut out)?;
            ctx.returning(&mut out, "NEW")?
        }
    };

    tracing::debug!(aql = %out, params = query.params.len(), "compiled query");
    Ok(CompiledQuery {
        text: out,
        params: query.params.clone(),
        columns,
    })
}

enum Projection {
    Count(String),
    Fields(Vec<Expr>),
}

fn columns_of(fields: &[Expr]) -> Vec<String> {
    fields
        .iter()
        .enumerate()
        .map(|(i, e)| match e {
            Expr::Field { name, .. } => name.clone(),
            _ => format!("expr{i}"),
        })
        .collect()
}

struct Ctx<'q> {
    query: &'q Query,
    aliases: Vec<String>,
    /// Grouped fields and the COLLECT variable each one is bound to.
    grouped: Option<Vec<(usize, String, String)>>,
    /// `OLD` / `NEW` while rendering the RETURN of a mutation.
    returning: Option<&'static str>,
}

impl<'q> Ctx<'q> {
    fn new(query: &'q Query) -> Result<Self> {
        let sources = std::iter::once(&query.from).chain(query.joins.iter().map(|j| &j.source));
        let mut aliases = Vec::with_capacity(query.joins.len() + 1);
        for (i, source) in sources.enumerate() {
            if source.name.is_empty() || source.name.contains('`') {
                return Err(AdapterError::compile(
                    format!("invalid collection name `{}`", source.name),
                    query.describe(),
                ));
            }
            let first = source
                .name
                .chars()
                .next()
                .filter(|c| c.is_ascii_alphabetic())
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or('t');
            aliases.push(format!("{first}{i}"));
        }
        Ok(Self {
            query,
            aliases,
            grouped: None,
            returning: None,
        })
    }

    fn error(&self, message: impl Into<String>) -> AdapterError {
        AdapterError::compile(message, self.query.describe())
    }

    fn from(&self, out: &mut String) {
        out.push_str(&format!("FOR {} IN `{}`", self.aliases[0], self.query.from.name));
    }

    fn joins(&self, out: &mut String) -> Result<()> {
        for (i, join) in self.query.joins.iter().enumerate() {
            if join.kind != JoinKind::Inner {
                return Err(self.error(format!(
                    "only inner joins are supported, got a {:?} join on `{}`",
                    join.kind, join.source.name
                )));
            }
            out.push_str(&format!(
                " FOR {} IN `{}` FILTER {}",
                self.aliases[i + 1],
                join.source.name,
                self.expr(&join.on)?
            ));
        }
        Ok(())
    }

    /// Left fold over the clauses of one tag space, parenthesising the accumulator
    /// whenever the combinator changes.
    fn boolean(&self, out: &mut String, keyword: &str, search: bool) -> Result<()> {
        let mut clauses = self.query.wheres.iter().filter(|w| w.op.is_search() == search);
        let Some(first) = clauses.next() else {
            return Ok(());
        };
        let mut op: BoolOp = first.op;
        let mut acc = self.paren(&first.expr)?;
        for clause in clauses {
            let rendered = self.paren(&clause.expr)?;
            acc = if clause.op == op {
                format!("{acc}{}{rendered}", clause.op.connective())
            } else {
                format!("({acc}){}{rendered}", clause.op.connective())
            };
            op = clause.op;
        }
        out.push_str(keyword);
        out.push_str(&acc);
        Ok(())
    }

    /// Emits the COLLECT for group terms. Returns true when the count aggregate was
    /// folded into it.
    fn group_by(&mut self, out: &mut String, counter: Option<&str>) -> Result<bool> {
        if self.query.group_bys.is_empty() {
            return Ok(false);
        }
        let mut keys = Vec::with_capacity(self.query.group_bys.len());
        let mut grouped = Vec::with_capacity(self.query.group_bys.len());
        for term in &self.query.group_bys {
            let Expr::Field { source, name } = term else {
                return Err(self.error("group_by only supports field references"));
            };
            let alias = self
                .aliases
                .get(*source)
                .ok_or_else(|| self.error(format!("unknown source index {source}")))?;
            let var = format!("{alias}_{name}");
            keys.push(format!("{var} = {}", self.expr(term)?));
            grouped.push((*source, name.clone(), var));
        }
        out.push_str(" COLLECT ");
        out.push_str(&keys.join(", "));
        if let Some(counter) = counter {
            out.push_str(" WITH COUNT INTO ");
            out.push_str(counter);
        }
        self.grouped = Some(grouped);
        Ok(counter.is_some())
    }

    fn order_by(&self, out: &mut String) -> Result<()> {
        if self.query.order_bys.is_empty() {
            return Ok(());
        }
        let mut terms = Vec::with_capacity(self.query.order_bys.len());
        for term in &self.query.order_bys {
            let mut rendered = self.expr(&term.expr)?;
            if term.direction == Direction::Desc {
                rendered.push_str(" DESC");
            }
            terms.push(rendered);
        }
        out.push_str(" SORT ");
        out.push_str(&terms.join(", "));
        Ok(())
    }

    fn offset_and_limit(&self, out: &mut String) -> Result<()> {
        match (&self.query.offset, &self.query.limit) {
            (Some(offset), Some(limit)) => {
                out.push_str(&format!(" LIMIT {}, {}", self.expr(offset)?, self.expr(limit)?));
            }
            (None, Some(limit)) => {
                out.push_str(&format!(" LIMIT {}", self.expr(limit)?));
            }
            (Some(_), None) => {
                return Err(self.error("offset can only be used together with limit"));
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn distinct(&self) -> Result<&'static str> {
        match &self.query.distinct {
            None | Some(Distinct::Flag(false)) => Ok(""),
            Some(Distinct::Flag(true)) => Ok("DISTINCT "),
            Some(Distinct::On(_)) => {
                Err(self.error("DISTINCT on specific fields is not supported, use a boolean flag"))
            }
        }
    }

    /// Resolve the requested projection: a single count aggregate, or a field list with
    /// whole-row references expanded through the bound entity schema.
    fn projection(&self) -> Result<Projection> {
        let default = [Expr::Source(0)];
        let requested: &[Expr] = match &self.query.select {
            Some(fields) => fields,
            None => &default,
        };
        if requested.is_empty() {
            return Err(self.error("empty projection"));
        }
        let counts = requested
            .iter()
            .filter(|e| matches!(e, Expr::Count(_)))
            .count();
        if counts > 0 {
            let [Expr::Count(target)] = requested else {
                return Err(if counts != requested.len() {
                    self.error("count cannot be selected together with other fields")
                } else {
                    self.error("only a single count aggregate can be selected")
                });
            };
            let name = match target.as_deref() {
                None | Some(Expr::Source(_)) => "total".to_string(),
                Some(Expr::Field { source, name }) => {
                    let alias = self
                        .aliases
                        .get(*source)
                        .ok_or_else(|| self.error(format!("unknown source index {source}")))?;
                    format!("{alias}_{name}")
                }
                Some(_) => return Err(self.error("count only accepts a field or a whole row")),
            };
            return Ok(Projection::Count(name));
        }
        let mut fields = Vec::with_capacity(requested.len());
        for expr in requested {
            match expr {
                Expr::Source(idx) => fields.extend(self.expand_source(*idx)?),
                other => fields.push(other.clone()),
            }
        }
        Ok(Projection::Fields(fields))
    }

    fn expand_source(&self, idx: usize) -> Result<Vec<Expr>> {
        let source = if idx == 0 {
            Some(&self.query.from)
        } else {
            self.query.joins.get(idx - 1).map(|j| &j.source)
        }
        .ok_or_else(|| self.error(format!("unknown source index {idx}")))?;
        match &source.schema {
            Some(schema) if !schema.fields.is_empty() => Ok(schema
                .fields
                .iter()
                .map(|f| Expr::Field {
                    source: idx,
                    // the primary key is stored as the document key
                    name: if *f == schema.primary_key {
                        "_key".to_string()
                    } else {
                        f.clone()
                    },
                })
                .collect()),
            _ => Err(self.error(format!(
                "cannot select all fields of `{}` without a field list or entity schema",
                source.name
            ))),
        }
    }

    fn array(&self, out: &mut String, fields: &[Expr]) -> Result<()> {
        let rendered = fields
            .iter()
            .map(|f| self.expr(f))
            .collect::<Result<Vec<_>>>()?;
        out.push_str("[ ");
        out.push_str(&rendered.join(", "));
        out.push_str(" ]");
        Ok(())
    }

    fn ensure_mutable(&self, what: &str) -> Result<()> {
        let sources = std::iter::once(&self.query.from).chain(self.query.joins.iter().map(|j| &j.source));
        for source in sources {
            if source.kind == SourceKind::View {
                return Err(self.error(format!(
                    "cannot {what} through view `{}`, views are read-only",
                    source.name
                )));
            }
        }
        if !self.query.group_bys.is_empty() {
            return Err(self.error(format!("group_by is not allowed in {what} queries")));
        }
        Ok(())
    }

    fn update(&self, out: &mut String) -> Result<()> {
        if self.query.updates.is_empty() {
            return Err(self.error("update query without any update directives"));
        }
        let mut sets = Vec::with_capacity(self.query.updates.len());
        for op in &self.query.updates {
            let target = self.field(0, &op.field)?;
            let rhs = match op.kind {
                UpdateKind::Set => self.expr(&op.value)?,
                UpdateKind::Inc => format!("{target} + {}", self.operand(&op.value)?),
                UpdateKind::Push => format!("PUSH({target}, {})", self.expr(&op.value)?),
                UpdateKind::Pull => format!("REMOVE_VALUE({target}, {}, 1)", self.expr(&op.value)?),
            };
            sets.push(format!("`{}`: {rhs}", op.field));
        }
        out.push_str(&format!(
            " UPDATE {} WITH {{{}}} IN `{}`",
            self.aliases[0],
            sets.join(", "),
            self.query.from.name
        ));
        Ok(())
    }

    fn returning(&mut self, out: &mut String, pseudo: &'static str) -> Result<Vec<String>> {
        if self.query.select.is_none() {
            return Ok(Vec::new());
        }
        let Projection::Fields(fields) = self.projection()? else {
            return Err(self.error("count cannot be returned from delete/update queries"));
        };
        self.returning = Some(pseudo);
        out.push_str(" RETURN ");
        let res = self.array(out, &fields);
        self.returning = None;
        res?;
        Ok(columns_of(&fields))
    }

    fn field(&self, source: usize, name: &str) -> Result<String> {
        if name.contains('`') {
            return Err(self.error(format!("invalid field name `{name}`")));
        }
        if let Some(grouped) = &self.grouped {
            return grouped
                .iter()
                .find(|(s, n, _)| *s == source && n == name)
                .map(|(_, _, var)| var.clone())
                .ok_or_else(|| self.error(format!("field `{name}` must appear in group_by")));
        }
        if let (Some(pseudo), 0) = (self.returning, source) {
            return Ok(format!("{pseudo}.`{name}`"));
        }
        let alias = self
            .aliases
            .get(source)
            .ok_or_else(|| self.error(format!("unknown source index {source}")))?;
        Ok(format!("{alias}.`{name}`"))
    }

    fn paren(&self, expr: &Expr) -> Result<String> {
        Ok(format!("({})", self.expr(expr)?))
    }

    /// Operand of a binary operator; nested binaries get parenthesised.
    fn operand(&self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Binary(..) => self.paren(expr),
            _ => self.expr(expr),
        }
    }

    fn expr(&self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Field { source, name } => self.field(*source, name),
            Expr::Source(idx) => {
                if self.grouped.is_some() {
                    return Err(self.error("whole rows cannot be referenced after group_by"));
                }
                if let (Some(pseudo), 0) = (self.returning, *idx) {
                    return Ok(pseudo.to_string());
                }
                self.aliases
                    .get(*idx)
                    .cloned()
                    .ok_or_else(|| self.error(format!("unknown source index {idx}")))
            }
            Expr::Param(idx) => {
                if *idx >= self.query.params.len() {
                    return Err(self.error(format!("parameter {idx} is not bound")));
                }
                Ok(format!("@{}", idx + 1))
            }
            Expr::Literal(lit) => self.literal(lit),
            Expr::List(items) => {
                let rendered = items
                    .iter()
                    .map(|i| self.expr(i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("[{}]", rendered.join(", ")))
            }
            Expr::Binary(op, lhs, rhs) => Ok(format!(
                "{} {} {}",
                self.operand(lhs)?,
                op.symbol(),
                self.operand(rhs)?
            )),
            Expr::Not(inner) => Ok(format!("NOT ({})", self.expr(inner)?)),
            Expr::In(lhs, rhs) => match rhs.as_ref() {
                Expr::List(items) if items.is_empty() => Ok("FALSE".to_string()),
                _ => Ok(format!("{} IN {}", self.operand(lhs)?, self.expr(rhs)?)),
            },
            Expr::IsNil(inner) => Ok(format!("{} == NULL", self.operand(inner)?)),
            Expr::Call(name, args) => {
                let rendered = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{name}({})", rendered.join(", ")))
            }
            Expr::Fragment(parts) => {
                let mut s = String::new();
                for part in parts {
                    match part {
                        FragmentPart::Raw(text) => s.push_str(text),
                        FragmentPart::Expr(e) => s.push_str(&self.expr(e)?),
                    }
                }
                Ok(s)
            }
            Expr::Count(_) => Err(self.error("count is only allowed as the sole projection")),
        }
    }

    fn literal(&self, lit: &Literal) -> Result<String> {
        Ok(match lit {
            Literal::Null => "NULL".to_string(),
            Literal::Bool(true) => "TRUE".to_string(),
            Literal::Bool(false) => "FALSE".to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) if f.is_finite() => f.to_string(),
            Literal::Float(f) => return Err(self.error(format!("non-finite number {f}"))),
            Literal::String(s) => quote_string(s),
        })
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
