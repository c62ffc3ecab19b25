//! Query-parameter composition for list and get endpoints.
//!
//! # Design
//! `QueryOptions` is a typed allow-list: the recognized options (pagination,
//! expand, order, search, filter, named filter) each have a field and an
//! encoder, and everything else goes through `extra` as a literal scalar
//! parameter. `compose` flattens the options into an ordered `QueryParams`
//! multimap, or `None` when nothing would be emitted so the caller can omit
//! the query string altogether.
//!
//! Emission order is fixed: `namedfilter`, `limit`, `offset`, `expand`,
//! `order`, `search`, `filter`, then `extra` in insertion order.

use std::fmt;

use crate::error::{ApiError, ApiResult};

/// Page size the server uses when `expand` is present; applied when the
/// caller does not pick a limit explicitly.
pub const EXPAND_DEFAULT_LIMIT: u64 = 100;

/// Maximum nesting of an expand tree, counting the root level.
pub const MAX_EXPAND_LEVELS: usize = 3;

// ---------------------------------------------------------------------------
// Option tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One entry of an expand tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandNode {
    /// `true` expands the field, `false` skips it.
    Include(bool),
    /// Expand the field and some of its own fields. An empty subtree expands
    /// just the field itself.
    Nested(Expand),
}

/// Ordered tree of fields to inline into the response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expand {
    entries: Vec<(String, ExpandNode)>,
}

impl Expand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand `name` as a leaf.
    pub fn field(self, name: impl Into<String>) -> Self {
        self.include(name, true)
    }

    pub fn include(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.entries.push((name.into(), ExpandNode::Include(enabled)));
        self
    }

    pub fn nested(mut self, name: impl Into<String>, child: Expand) -> Self {
        self.entries.push((name.into(), ExpandNode::Nested(child)));
        self
    }

    pub fn entries(&self) -> &[(String, ExpandNode)] {
        &self.entries
    }

    /// True when flattening would emit no path at all.
    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(|(_, node)| match node {
            ExpandNode::Include(enabled) => *enabled,
            ExpandNode::Nested(child) => child.entries.is_empty() || !child.is_empty(),
        })
    }

    /// Flatten the tree into dotted field paths in declaration order.
    ///
    /// Fails with `ApiError::ExpandTooDeep` when any branch nests deeper than
    /// `MAX_EXPAND_LEVELS`.
    pub fn paths(&self) -> ApiResult<Vec<String>> {
        let mut out = Vec::new();
        traverse_expand(self, "", 0, &mut out)?;
        Ok(out)
    }
}

fn traverse_expand(
    tree: &Expand,
    prefix: &str,
    depth: usize,
    out: &mut Vec<String>,
) -> ApiResult<()> {
    for (name, node) in &tree.entries {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match node {
            ExpandNode::Include(false) => {}
            ExpandNode::Include(true) => out.push(path),
            ExpandNode::Nested(child) if child.entries.is_empty() => out.push(path),
            ExpandNode::Nested(child) => {
                let depth = depth + 1;
                if depth >= MAX_EXPAND_LEVELS {
                    return Err(ApiError::ExpandTooDeep {
                        max_levels: MAX_EXPAND_LEVELS,
                    });
                }
                traverse_expand(child, &path, depth, out)?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTerm {
    /// Bare field name; the server applies its default direction.
    Field(String),
    Directed { field: String, direction: Direction },
}

impl OrderTerm {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderTerm::Directed {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderTerm::Directed {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

impl fmt::Display for OrderTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderTerm::Field(field) => f.write_str(field),
            OrderTerm::Directed { field, direction } => {
                write!(f, "{field},{}", direction.as_str())
            }
        }
    }
}

/// One or more sort terms, applied in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order(pub Vec<OrderTerm>);

impl From<&str> for Order {
    fn from(field: &str) -> Self {
        Order(vec![OrderTerm::Field(field.to_string())])
    }
}

impl From<String> for Order {
    fn from(field: String) -> Self {
        Order(vec![OrderTerm::Field(field)])
    }
}

impl From<OrderTerm> for Order {
    fn from(term: OrderTerm) -> Self {
        Order(vec![term])
    }
}

impl From<Vec<OrderTerm>> for Order {
    fn from(terms: Vec<OrderTerm>) -> Self {
        Order(terms)
    }
}

fn traverse_order(order: &Order) -> Option<String> {
    let joined = order
        .0
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";");
    (!joined.is_empty()).then_some(joined)
}

/// A literal value as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => f.write_str(s),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Float(n) => f.write_str(ryu_js::Buffer::new().format(*n)),
            Scalar::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// A single filter operator applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// `field=v`, one clause per value.
    Eq(Vec<Scalar>),
    /// `field!=v`, one clause per value.
    Ne(Vec<Scalar>),
    IsNull(bool),
    IsNotNull(bool),
    Gt(Scalar),
    Gte(Scalar),
    Lt(Scalar),
    Lte(Scalar),
    /// Substring match.
    Like(Scalar),
    /// Starts with.
    Sw(Scalar),
    /// Ends with.
    Ew(Scalar),
}

impl FilterOp {
    pub fn eq(value: impl Into<Scalar>) -> Self {
        FilterOp::Eq(vec![value.into()])
    }

    pub fn eq_any<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        FilterOp::Eq(values.into_iter().map(Into::into).collect())
    }

    pub fn ne(value: impl Into<Scalar>) -> Self {
        FilterOp::Ne(vec![value.into()])
    }

    pub fn ne_any<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        FilterOp::Ne(values.into_iter().map(Into::into).collect())
    }

    pub fn gt(value: impl Into<Scalar>) -> Self {
        FilterOp::Gt(value.into())
    }

    pub fn gte(value: impl Into<Scalar>) -> Self {
        FilterOp::Gte(value.into())
    }

    pub fn lt(value: impl Into<Scalar>) -> Self {
        FilterOp::Lt(value.into())
    }

    pub fn lte(value: impl Into<Scalar>) -> Self {
        FilterOp::Lte(value.into())
    }

    pub fn like(value: impl Into<Scalar>) -> Self {
        FilterOp::Like(value.into())
    }

    pub fn sw(value: impl Into<Scalar>) -> Self {
        FilterOp::Sw(value.into())
    }

    pub fn ew(value: impl Into<Scalar>) -> Self {
        FilterOp::Ew(value.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    /// Repeated equality: matches any of the values.
    Any(Vec<Scalar>),
    Ops(Vec<FilterOp>),
}

/// Ordered map of field name to filter value. A `None` value emits nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entries: Vec<(String, Option<FilterValue>)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Option<FilterValue>) -> Self {
        self.entries.push((field.into(), value));
        self
    }

    /// `field=value`.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set(field, Some(FilterValue::Scalar(value.into())))
    }

    /// `field=a;field=b;...`
    pub fn any<I, S>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.set(field, Some(FilterValue::Any(values)))
    }

    pub fn ops(self, field: impl Into<String>, ops: Vec<FilterOp>) -> Self {
        self.set(field, Some(FilterValue::Ops(ops)))
    }

    pub fn entries(&self) -> &[(String, Option<FilterValue>)] {
        &self.entries
    }
}

fn traverse_filter(field: &str, value: &FilterValue, clauses: &mut Vec<String>) {
    match value {
        FilterValue::Scalar(v) => clauses.push(format!("{field}={v}")),
        FilterValue::Any(values) => {
            clauses.extend(values.iter().map(|v| format!("{field}={v}")));
        }
        FilterValue::Ops(ops) => {
            for op in ops {
                match op {
                    FilterOp::Eq(values) => {
                        clauses.extend(values.iter().map(|v| format!("{field}={v}")));
                    }
                    FilterOp::Ne(values) => {
                        clauses.extend(values.iter().map(|v| format!("{field}!={v}")));
                    }
                    FilterOp::IsNull(true) | FilterOp::IsNotNull(false) => {
                        clauses.push(format!("{field}="));
                    }
                    FilterOp::IsNull(false) | FilterOp::IsNotNull(true) => {
                        clauses.push(format!("{field}!="));
                    }
                    FilterOp::Gt(v) => clauses.push(format!("{field}>{v}")),
                    FilterOp::Gte(v) => clauses.push(format!("{field}>={v}")),
                    FilterOp::Lt(v) => clauses.push(format!("{field}<{v}")),
                    FilterOp::Lte(v) => clauses.push(format!("{field}<={v}")),
                    FilterOp::Like(v) => clauses.push(format!("{field}~{v}")),
                    FilterOp::Sw(v) => clauses.push(format!("{field}~={v}")),
                    FilterOp::Ew(v) => clauses.push(format!("{field}=~{v}")),
                }
            }
        }
    }
}

fn compose_filter(filter: &Filter) -> Option<String> {
    let mut clauses = Vec::new();
    for (field, value) in &filter.entries {
        if let Some(value) = value {
            traverse_filter(field, value, &mut clauses);
        }
    }
    (!clauses.is_empty()).then(|| clauses.join(";"))
}

/// Structured options for a list or get request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub pagination: Option<Pagination>,
    pub expand: Option<Expand>,
    pub order: Option<Order>,
    pub search: Option<String>,
    pub filter: Option<Filter>,
    pub namedfilter: Option<String>,
    /// Any other option, sent verbatim as `key=value`.
    pub extra: Vec<(String, Scalar)>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.pagination.get_or_insert_with(Pagination::default).limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.pagination.get_or_insert_with(Pagination::default).offset = Some(offset);
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        self.expand = Some(expand);
        self
    }

    pub fn order(mut self, order: impl Into<Order>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn namedfilter(mut self, href: impl Into<String>) -> Self {
        self.namedfilter = Some(href.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// True when a non-empty expand tree is set.
    pub fn has_expand(&self) -> bool {
        self.expand.as_ref().is_some_and(|e| !e.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Output multimap
// ---------------------------------------------------------------------------

/// Ordered query-parameter multimap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Percent-encoded `k=v&k=v` form, without the leading `?`.
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

/// Flatten `options` into query parameters.
///
/// Returns `Ok(None)` when no parameter would be emitted. The only failure is
/// an expand tree nested deeper than `MAX_EXPAND_LEVELS`.
pub fn compose(options: &QueryOptions) -> ApiResult<Option<QueryParams>> {
    let mut params = QueryParams::new();

    if let Some(namedfilter) = options.namedfilter.as_deref().filter(|s| !s.is_empty()) {
        params.append("namedfilter", namedfilter);
    }

    let expand = match &options.expand {
        Some(expand) => expand.paths()?,
        None => Vec::new(),
    };

    let pagination = options.pagination.unwrap_or_default();
    let limit = pagination
        .limit
        .or_else(|| (!expand.is_empty()).then_some(EXPAND_DEFAULT_LIMIT));
    if let Some(limit) = limit {
        params.append("limit", limit.to_string());
    }
    if let Some(offset) = pagination.offset {
        params.append("offset", offset.to_string());
    }

    if !expand.is_empty() {
        params.append("expand", expand.join(","));
    }

    if let Some(order) = options.order.as_ref().and_then(traverse_order) {
        params.append("order", order);
    }

    if let Some(search) = options.search.as_deref().filter(|s| !s.is_empty()) {
        params.append("search", search);
    }

    if let Some(filter) = options.filter.as_ref().and_then(compose_filter) {
        params.append("filter", filter);
    }

    for (key, value) in &options.extra {
        params.append(key.as_str(), value.to_string());
    }

    Ok((!params.is_empty()).then_some(params))
}
