use crate::record::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl CompareOp {
    pub fn is_ordering(&self) -> bool {
        !matches!(self, CompareOp::Equal | CompareOp::NotEqual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Contains,
    BeginsWith,
    EndsWith,
    /// `*` matches any run of characters, `?` exactly one
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Case {
    #[default]
    Sensitive,
    Insensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Condition tree over one table. Paths name a column, optionally reached
/// through link columns (`"owner.name"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Compare {
        path: String,
        op: CompareOp,
        value: Value,
        case: Case,
    },
    /// Inclusive on both ends
    Between {
        path: String,
        low: Value,
        high: Value,
    },
    StringMatch {
        path: String,
        op: StringOp,
        pattern: String,
        case: Case,
    },
    IsNull(String),
    IsNotNull(String),
    IsEmpty(String),
    IsNotEmpty(String),
    In {
        path: String,
        values: Vec<Value>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Conjunction that flattens nested ANDs
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) => {
                a.push(p);
                Predicate::And(a)
            }
            (p, Predicate::And(mut b)) => {
                b.insert(0, p);
                Predicate::And(b)
            }
            (a, b) => Predicate::And(vec![a, b]),
        }
    }

    /// Disjunction that flattens nested ORs
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Or(mut a), Predicate::Or(b)) => {
                a.extend(b);
                Predicate::Or(a)
            }
            (Predicate::Or(mut a), p) => {
                a.push(p);
                Predicate::Or(a)
            }
            (a, b) => Predicate::Or(vec![a, b]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

/// One level of grouping: a disjunction of conjunctions
#[derive(Debug, Clone)]
struct Frame {
    disjuncts: Vec<Vec<Predicate>>,
    /// Negate the next condition or group
    negate_next: bool,
    /// Negate the whole group when it closes
    negated: bool,
}

impl Frame {
    fn new(negated: bool) -> Self {
        Self {
            disjuncts: vec![Vec::new()],
            negate_next: false,
            negated,
        }
    }

    fn push(&mut self, predicate: Predicate) {
        let predicate = if std::mem::take(&mut self.negate_next) {
            predicate.not()
        } else {
            predicate
        };
        if let Some(last) = self.disjuncts.last_mut() {
            last.push(predicate);
        }
    }

    fn finish(self) -> Result<Predicate, String> {
        if self.negate_next {
            return Err("not() must be followed by a condition".to_string());
        }
        let trailing_or = self.disjuncts.len() > 1 && self.disjuncts.last().is_some_and(Vec::is_empty);
        if trailing_or {
            return Err("or() must be followed by a condition".to_string());
        }

        let mut terms = self.disjuncts.into_iter().map(|conj| {
            conj.into_iter().fold(Predicate::True, Predicate::and)
        });
        let first = terms.next().unwrap_or(Predicate::True);
        let predicate = terms.fold(first, Predicate::or);
        Ok(if self.negated { predicate.not() } else { predicate })
    }
}

/// Chained query builder.
///
/// Conditions are joined with AND unless separated by [`Query::or`];
/// [`Query::not`] negates the following condition or group. Groups opened
/// with [`Query::begin_group`] must be closed with [`Query::end_group`].
///
/// ```ignore
/// let adults = Query::new("Person")
///     .greater_than_or_equal("age", 18)
///     .begin_group()
///     .begins_with("name", "a")
///     .or()
///     .equal_to("dog.name", "rex")
///     .end_group()
///     .sort("age", SortOrder::Descending)
///     .limit(10);
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    table: String,
    frames: Vec<Frame>,
    pub(crate) sort: Vec<(String, SortOrder)>,
    pub(crate) distinct: Vec<String>,
    pub(crate) limit: Option<usize>,
    /// First misuse of the builder, reported on compile
    error: Option<String>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            frames: vec![Frame::new(false)],
            sort: Vec::new(),
            distinct: Vec::new(),
            limit: None,
            error: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn fail(&mut self, msg: &str) {
        if self.error.is_none() {
            self.error = Some(msg.to_string());
        }
    }

    fn frame(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::new(false));
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Add an arbitrary predicate as the next condition
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.frame().push(predicate);
        self
    }

    fn compare(self, path: &str, op: CompareOp, value: Value, case: Case) -> Self {
        self.filter(Predicate::Compare {
            path: path.to_string(),
            op,
            value,
            case,
        })
    }

    pub fn equal_to(self, path: &str, value: impl Into<Value>) -> Self {
        self.compare(path, CompareOp::Equal, value.into(), Case::Sensitive)
    }

    /// String equality with a case option
    pub fn equal_to_case(self, path: &str, value: &str, case: Case) -> Self {
        self.compare(path, CompareOp::Equal, Value::from(value), case)
    }

    pub fn not_equal_to(self, path: &str, value: impl Into<Value>) -> Self {
        self.compare(path, CompareOp::NotEqual, value.into(), Case::Sensitive)
    }

    pub fn not_equal_to_case(self, path: &str, value: &str, case: Case) -> Self {
        self.compare(path, CompareOp::NotEqual, Value::from(value), case)
    }

    pub fn greater_than(self, path: &str, value: impl Into<Value>) -> Self {
        self.compare(path, CompareOp::Greater, value.into(), Case::Sensitive)
    }

    pub fn greater_than_or_equal(self, path: &str, value: impl Into<Value>) -> Self {
        self.compare(path, CompareOp::GreaterEqual, value.into(), Case::Sensitive)
    }

    pub fn less_than(self, path: &str, value: impl Into<Value>) -> Self {
        self.compare(path, CompareOp::Less, value.into(), Case::Sensitive)
    }

    pub fn less_than_or_equal(self, path: &str, value: impl Into<Value>) -> Self {
        self.compare(path, CompareOp::LessEqual, value.into(), Case::Sensitive)
    }

    /// `low <= value <= high`
    pub fn between(self, path: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.filter(Predicate::Between {
            path: path.to_string(),
            low: low.into(),
            high: high.into(),
        })
    }

    fn string_match(self, path: &str, op: StringOp, pattern: &str, case: Case) -> Self {
        self.filter(Predicate::StringMatch {
            path: path.to_string(),
            op,
            pattern: pattern.to_string(),
            case,
        })
    }

    pub fn contains(self, path: &str, pattern: &str) -> Self {
        self.string_match(path, StringOp::Contains, pattern, Case::Sensitive)
    }

    pub fn contains_case(self, path: &str, pattern: &str, case: Case) -> Self {
        self.string_match(path, StringOp::Contains, pattern, case)
    }

    pub fn begins_with(self, path: &str, pattern: &str) -> Self {
        self.string_match(path, StringOp::BeginsWith, pattern, Case::Sensitive)
    }

    pub fn begins_with_case(self, path: &str, pattern: &str, case: Case) -> Self {
        self.string_match(path, StringOp::BeginsWith, pattern, case)
    }

    pub fn ends_with(self, path: &str, pattern: &str) -> Self {
        self.string_match(path, StringOp::EndsWith, pattern, Case::Sensitive)
    }

    pub fn ends_with_case(self, path: &str, pattern: &str, case: Case) -> Self {
        self.string_match(path, StringOp::EndsWith, pattern, case)
    }

    /// Wildcard match: `*` for any run of characters, `?` for one
    pub fn like(self, path: &str, pattern: &str) -> Self {
        self.string_match(path, StringOp::Like, pattern, Case::Sensitive)
    }

    pub fn like_case(self, path: &str, pattern: &str, case: Case) -> Self {
        self.string_match(path, StringOp::Like, pattern, case)
    }

    pub fn is_null(self, path: &str) -> Self {
        self.filter(Predicate::IsNull(path.to_string()))
    }

    pub fn is_not_null(self, path: &str) -> Self {
        self.filter(Predicate::IsNotNull(path.to_string()))
    }

    pub fn is_empty(self, path: &str) -> Self {
        self.filter(Predicate::IsEmpty(path.to_string()))
    }

    pub fn is_not_empty(self, path: &str) -> Self {
        self.filter(Predicate::IsNotEmpty(path.to_string()))
    }

    pub fn in_values(self, path: &str, values: Vec<Value>) -> Self {
        self.filter(Predicate::In {
            path: path.to_string(),
            values,
        })
    }

    /// Start a new alternative
    pub fn or(mut self) -> Self {
        let frame = self.frame();
        if frame.negate_next || frame.disjuncts.last().is_none_or(Vec::is_empty) {
            self.fail("or() must follow a condition");
            return self;
        }
        frame.disjuncts.push(Vec::new());
        self
    }

    /// Negate the next condition or group
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        let frame = self.frame();
        frame.negate_next = !frame.negate_next;
        self
    }

    pub fn begin_group(mut self) -> Self {
        let negated = std::mem::take(&mut self.frame().negate_next);
        self.frames.push(Frame::new(negated));
        self
    }

    pub fn end_group(mut self) -> Self {
        if self.frames.len() < 2 {
            self.fail("end_group() without begin_group()");
            return self;
        }
        let Some(frame) = self.frames.pop() else {
            return self;
        };
        let empty = frame.disjuncts.iter().all(Vec::is_empty);
        match frame.finish() {
            Ok(_) if empty => self.fail("empty group"),
            Ok(predicate) => self.frame().push(predicate),
            Err(msg) => self.fail(&msg),
        }
        self
    }

    /// Sort by `path`; later calls add tie-breakers
    pub fn sort(mut self, path: &str, order: SortOrder) -> Self {
        self.sort.push((path.to_string(), order));
        self
    }

    /// Keep only the first row for each distinct value of `path`
    pub fn distinct(mut self, path: &str) -> Self {
        self.distinct.push(path.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The condition tree built so far
    pub fn predicate(&self) -> Result<Predicate, String> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.frames.len() != 1 {
            return Err(format!("{} unclosed group(s)", self.frames.len() - 1));
        }
        match self.frames.first() {
            Some(frame) => frame.clone().finish(),
            None => Ok(Predicate::True),
        }
    }
}
