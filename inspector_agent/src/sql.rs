//! Query timing for database drivers.
//!
//! [`InstrumentedConnection`] decorates any driver implementing the minimal
//! [`Connection`] seam, timing each statement around the inner call on every
//! exit path. Results and errors pass through unchanged.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::{config::BoundaryTracing, transaction::SegmentId, Inspector};

/// Queries longer than this are cut down for the segment label; the full
/// text stays in the `DB` context group.
const MAX_QUERY_LABEL: usize = 80;

/// Times one SQL statement at a time against the tracer.
///
/// Stopping a query that was never started is a defect at the driver wrapper,
/// reported loudly rather than swallowed.
pub struct SqlSegmentTracer {
    inspector: Arc<Inspector>,
    connection: String,
    segment: Option<SegmentId>,
}

impl SqlSegmentTracer {
    pub fn new(inspector: Arc<Inspector>, connection: impl Into<String>) -> Self {
        Self {
            inspector,
            connection: connection.into(),
            segment: None,
        }
    }

    /// An independent tracer with its own query slot, for prepared statements
    /// that outlive the connection call that created them.
    pub fn fork(&self) -> Self {
        Self {
            inspector: self.inspector.clone(),
            connection: self.connection.clone(),
            segment: None,
        }
    }

    pub fn start_query(&mut self, sql: &str, bindings: &[Value]) {
        if !self.inspector.can_add_segments() {
            return;
        }

        let id = self.inspector.start_segment("sql", &query_label(sql));

        let mut db = json!({
            "sql": sql,
            "connection": self.connection,
        });
        if self.inspector.config().query_bindings && !bindings.is_empty() {
            db["bindings"] = Value::Array(bindings.to_vec());
        }
        self.inspector.add_segment_context(id, "DB", db);

        self.segment = Some(id);
    }

    /// # Panics
    ///
    /// Panics when no query segment is open.
    pub fn stop_query(&mut self) {
        if !self.inspector.can_add_segments() {
            return;
        }

        match self.segment.take() {
            Some(id) => self.inspector.end_segment(id),
            None => panic!("attempt to stop a query segment that has not been started"),
        }
    }
}

fn query_label(sql: &str) -> String {
    if sql.chars().count() <= MAX_QUERY_LABEL {
        sql.to_owned()
    } else {
        let prefix: String = sql.chars().take(MAX_QUERY_LABEL).collect();
        format!("{prefix}...")
    }
}

/// Minimal driver seam a database connection must expose to be wrapped.
pub trait Connection {
    type Rows;
    type Error: std::error::Error;
    type Statement: Statement<Rows = Self::Rows, Error = Self::Error>;

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, Self::Error>;
    fn query(&mut self, sql: &str) -> Result<Self::Rows, Self::Error>;
    fn exec(&mut self, sql: &str) -> Result<u64, Self::Error>;
    fn begin_transaction(&mut self) -> Result<(), Self::Error>;
    fn commit(&mut self) -> Result<(), Self::Error>;
    fn roll_back(&mut self) -> Result<(), Self::Error>;
}

pub trait Statement {
    type Rows;
    type Error: std::error::Error;

    fn execute(&mut self, bindings: &[Value]) -> Result<Self::Rows, Self::Error>;
}

/// Connection decorator that emits one "sql" segment per statement.
///
/// Database transaction boundaries keep a nesting counter. Under
/// [`BoundaryTracing::OuterOnly`] only the transition across depth zero emits
/// START TRANSACTION / COMMIT / ROLLBACK segments, so drivers that pass
/// nested begin/commit calls through do not produce duplicate boundary
/// segments.
pub struct InstrumentedConnection<C: Connection> {
    inner: C,
    tracer: SqlSegmentTracer,
    boundary_tracing: BoundaryTracing,
    nesting_level: u32,
}

impl<C: Connection> InstrumentedConnection<C> {
    pub fn new(inner: C, inspector: Arc<Inspector>, connection: impl Into<String>) -> Self {
        let boundary_tracing = inspector.config().sql_transaction_tracing;
        Self {
            inner,
            tracer: SqlSegmentTracer::new(inspector, connection),
            boundary_tracing,
            nesting_level: 0,
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn traced<T>(
        tracer: &mut SqlSegmentTracer,
        sql: &str,
        bindings: &[Value],
        run: impl FnOnce() -> Result<T, C::Error>,
    ) -> Result<T, C::Error> {
        tracer.start_query(sql, bindings);
        let result = run();
        tracer.stop_query();
        result
    }
}

impl<C: Connection> Connection for InstrumentedConnection<C> {
    type Rows = C::Rows;
    type Error = C::Error;
    type Statement = InstrumentedStatement<C::Statement>;

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement, Self::Error> {
        Ok(InstrumentedStatement {
            inner: self.inner.prepare(sql)?,
            tracer: self.tracer.fork(),
            sql: sql.to_owned(),
        })
    }

    fn query(&mut self, sql: &str) -> Result<Self::Rows, Self::Error> {
        Self::traced(&mut self.tracer, sql, &[], || self.inner.query(sql))
    }

    fn exec(&mut self, sql: &str) -> Result<u64, Self::Error> {
        Self::traced(&mut self.tracer, sql, &[], || self.inner.exec(sql))
    }

    fn begin_transaction(&mut self) -> Result<(), Self::Error> {
        let traced = match self.boundary_tracing {
            BoundaryTracing::OuterOnly => {
                self.nesting_level += 1;
                self.nesting_level == 1
            }
            BoundaryTracing::EveryLevel => true,
        };
        if traced {
            Self::traced(&mut self.tracer, "START TRANSACTION", &[], || {
                self.inner.begin_transaction()
            })
        } else {
            self.inner.begin_transaction()
        }
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        self.close_boundary("COMMIT", |inner| inner.commit())
    }

    fn roll_back(&mut self) -> Result<(), Self::Error> {
        self.close_boundary("ROLLBACK", |inner| inner.roll_back())
    }
}

impl<C: Connection> InstrumentedConnection<C> {
    fn close_boundary(
        &mut self,
        sql: &str,
        run: impl FnOnce(&mut C) -> Result<(), C::Error>,
    ) -> Result<(), C::Error> {
        let traced = match self.boundary_tracing {
            BoundaryTracing::OuterOnly => {
                let outermost = self.nesting_level == 1;
                self.nesting_level = self.nesting_level.saturating_sub(1);
                outermost
            }
            BoundaryTracing::EveryLevel => true,
        };
        if traced {
            Self::traced(&mut self.tracer, sql, &[], || run(&mut self.inner))
        } else {
            run(&mut self.inner)
        }
    }
}

/// Statement decorator carrying the SQL text captured at prepare time.
pub struct InstrumentedStatement<S: Statement> {
    inner: S,
    tracer: SqlSegmentTracer,
    sql: String,
}

impl<S: Statement> Statement for InstrumentedStatement<S> {
    type Rows = S::Rows;
    type Error = S::Error;

    fn execute(&mut self, bindings: &[Value]) -> Result<Self::Rows, Self::Error> {
        self.tracer.start_query(&self.sql, bindings);
        let result = self.inner.execute(bindings);
        self.tracer.stop_query();
        result
    }
}
