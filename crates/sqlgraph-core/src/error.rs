//! Error types for graph save and shaped fetch operations.

use std::fmt;

/// The primary error type for all sqlgraph operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, timeout)
    Connection(ConnectionError),
    /// Statement execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// The input graph cannot be normalized
    MalformedGraph(MalformedGraphError),
    /// Rows to be inserted reference each other in a cycle
    CyclicDependency(CyclicDependencyError),
    /// A uniqueness conflict that could not be recovered
    ConstraintConflict(ConstraintConflictError),
    /// A shape or instance names an undeclared property
    UnknownProperty(UnknownPropertyError),
    /// A dissociation policy forbids the required link removal
    Dissociation(DissociationError),
    /// Invalid shape specification
    Shape(ShapeError),
    /// Invalid entity descriptor registration
    Registry(RegistryError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

/// Location of a node or property inside an input graph or shape,
/// rendered as `Book(id=3).authors[1].name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphPath {
    root: String,
    steps: Vec<PathStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Member(String),
    Index(usize),
}

impl GraphPath {
    /// Path starting at an entity, optionally identified by a key.
    pub fn root(entity: &str, key: Option<&dyn fmt::Display>) -> Self {
        let root = match key {
            Some(key) => format!("{entity}(id={key})"),
            None => entity.to_string(),
        };
        Self {
            root,
            steps: Vec::new(),
        }
    }

    /// Extend the path with a property or association name.
    #[must_use]
    pub fn member(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.steps.push(PathStep::Member(name.to_string()));
        next
    }

    /// Extend the path with a collection index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.steps.push(PathStep::Index(index));
        next
    }

    /// Number of steps below the root.
    pub fn depth(&self) -> usize {
        self.steps.len()
    }
}

impl fmt::Display for GraphPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for step in &self.steps {
            match step {
                PathStep::Member(name) => write!(f, ".{name}")?,
                PathStep::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
    /// Connection pool exhausted
    PoolExhausted,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Statement not supported by the backend
    Unsupported,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// Savepoint not found
    SavepointNotFound,
}

/// Why a graph could not be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// No identifier, no complete unique key, and no generated id to fall back on
    UnresolvableKey,
    /// A reference or update target does not exist in storage
    DanglingReference,
    /// NULL given for a non-nullable property or association
    NullNotAllowed,
    /// A to-one association given a collection or vice versa
    CardinalityMismatch,
    /// Instance type or value type does not match the declaration
    TypeMismatch,
}

#[derive(Debug, Clone)]
pub struct MalformedGraphError {
    pub reason: MalformedReason,
    pub entity: String,
    pub path: GraphPath,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CyclicDependencyError {
    /// Nodes forming the cycle, in dependency order
    pub cycle: Vec<GraphPath>,
}

#[derive(Debug)]
pub struct ConstraintConflictError {
    pub entity: String,
    pub path: GraphPath,
    pub message: String,
    pub source: Option<QueryError>,
}

#[derive(Debug, Clone)]
pub struct UnknownPropertyError {
    pub entity: String,
    pub property: String,
    pub path: GraphPath,
}

#[derive(Debug, Clone)]
pub struct DissociationError {
    pub entity: String,
    pub association: String,
    pub path: GraphPath,
    /// Number of stored links the input graph would remove
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeErrorKind {
    /// Nesting deeper than the configured guard
    DepthExceeded,
    /// `recursive` used on an association whose target is a different entity
    RecursiveTargetMismatch,
    /// Shape rooted at a different entity than the data it is applied to
    EntityMismatch,
}

#[derive(Debug, Clone)]
pub struct ShapeError {
    pub kind: ShapeErrorKind,
    pub path: GraphPath,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RegistryError {
    pub entity: Option<String>,
    pub message: String,
}

impl Error {
    /// Is this a retryable error (deadlock, serialization, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Connection(c) => matches!(c.kind, ConnectionErrorKind::PoolExhausted),
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(c) if !matches!(c.kind, ConnectionErrorKind::PoolExhausted)
        )
    }

    /// Is this a unique constraint violation reported by storage?
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::Query(q) if q.is_unique_violation())
    }

    /// Errors detected before any statement touches storage.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::MalformedGraph(_)
                | Error::CyclicDependency(_)
                | Error::UnknownProperty(_)
                | Error::Shape(_)
                | Error::Registry(_)
        )
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for a [`MalformedGraphError`].
    pub fn malformed(
        reason: MalformedReason,
        entity: &str,
        path: GraphPath,
        message: impl Into<String>,
    ) -> Self {
        Error::MalformedGraph(MalformedGraphError {
            reason,
            entity: entity.to_string(),
            path,
            message: message.into(),
        })
    }
}

impl QueryError {
    /// Create a query error of the given kind.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            sqlstate: None,
            message: message.into(),
            detail: None,
            source: None,
        }
    }

    /// A unique-constraint violation (SQLSTATE 23505).
    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Constraint, message).with_sqlstate("23505")
    }

    #[must_use]
    pub fn with_sqlstate(mut self, sqlstate: &str) -> Self {
        self.sqlstate = Some(sqlstate.to_string());
        self
    }

    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Is this a unique constraint violation?
    ///
    /// SQLite and MySQL drivers report unique violations with their own
    /// codes; they are mapped to 23505 at the driver boundary.
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::MalformedGraph(e) => write!(f, "Malformed graph: {e}"),
            Error::CyclicDependency(e) => write!(f, "Cyclic dependency: {e}"),
            Error::ConstraintConflict(e) => write!(f, "Constraint conflict: {e}"),
            Error::UnknownProperty(e) => write!(f, "Unknown property: {e}"),
            Error::Dissociation(e) => write!(f, "Dissociation refused: {e}"),
            Error::Shape(e) => write!(f, "Invalid shape: {e}"),
            Error::Registry(e) => write!(f, "Registry error: {e}"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::ConstraintConflict(e) => e
                .source
                .as_ref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for MalformedGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.entity, self.path, self.message)
    }
}

impl fmt::Display for CyclicDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rows to be inserted reference each other: ")?;
        for (i, node) in self.cycle.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ConstraintConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.entity, self.path, self.message)
    }
}

impl fmt::Display for UnknownPropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is not declared on {} (at {})",
            self.property, self.entity, self.path
        )
    }
}

impl fmt::Display for DissociationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} disallows removing {} stored link(s) (at {})",
            self.entity, self.association, self.removed, self.path
        )
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.path)
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{entity}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<MalformedGraphError> for Error {
    fn from(err: MalformedGraphError) -> Self {
        Error::MalformedGraph(err)
    }
}

impl From<CyclicDependencyError> for Error {
    fn from(err: CyclicDependencyError) -> Self {
        Error::CyclicDependency(err)
    }
}

impl From<ConstraintConflictError> for Error {
    fn from(err: ConstraintConflictError) -> Self {
        Error::ConstraintConflict(err)
    }
}

impl From<UnknownPropertyError> for Error {
    fn from(err: UnknownPropertyError) -> Self {
        Error::UnknownProperty(err)
    }
}

impl From<DissociationError> for Error {
    fn from(err: DissociationError) -> Self {
        Error::Dissociation(err)
    }
}

impl From<ShapeError> for Error {
    fn from(err: ShapeError) -> Self {
        Error::Shape(err)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Registry(err)
    }
}

/// Result type alias for sqlgraph operations.
pub type Result<T> = std::result::Result<T, Error>;
