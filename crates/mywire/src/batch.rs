//! Batch execution of one statement over many parameter sets.
//!
//! The statement text may use `@name` or `:name` placeholders; those that
//! match a batch key are rewritten to `?` and bound positionally. The
//! statement is prepared once and executed once per parameter set, either
//! one round trip at a time or pipelined (every execute written before any
//! reply is read).

use crate::connection::{MySqlSession, finish};
use crate::protocol::prepared::cursor;
use crate::sql::{bind_named, rewrite_named_placeholders};
use crate::stream::ByteStream;
use asupersync::{Cx, Outcome};
use mywire_core::error::{TransactionError, TransactionErrorKind};
use mywire_core::{Error, Value};
use std::collections::HashMap;

/// Parameter sets of a batch.
#[derive(Debug, Clone, Copy)]
pub enum BatchParams<'a> {
    /// One name-to-value map per execution
    Dict(&'a [HashMap<String, Value>]),
    /// One array per name; every array has one entry per execution
    Array(&'a HashMap<String, Vec<Value>>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Wrap the executions in BEGIN/COMMIT. A failure leaves the
    /// transaction open for the caller to roll back.
    pub transaction: bool,
    /// Write every execute before reading replies (also requires
    /// pipelining to be enabled in the connection config).
    pub pipeline: bool,
}

/// Rewritten statement text plus one positional parameter row per execution.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub sql: String,
    pub rows: Vec<Vec<Value>>,
}

fn bare_name(key: &str) -> &str {
    key.strip_prefix(['@', ':']).unwrap_or(key)
}

impl BatchPlan {
    pub fn new(sql: &str, params: BatchParams<'_>) -> Result<Self, Error> {
        match params {
            BatchParams::Dict(maps) => {
                let keys: std::collections::HashSet<&str> = maps
                    .iter()
                    .flat_map(|m| m.keys().map(|k| bare_name(k)))
                    .collect();
                let (sql, names) = rewrite_named_placeholders(sql, |name| keys.contains(name));
                let rows = maps
                    .iter()
                    .map(|map| {
                        let normalized: HashMap<String, Value> = map
                            .iter()
                            .map(|(k, v)| (bare_name(k).to_string(), v.clone()))
                            .collect();
                        bind_named(&names, &normalized)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self { sql, rows })
            }
            BatchParams::Array(arrays) => {
                let arrays: HashMap<&str, &Vec<Value>> =
                    arrays.iter().map(|(k, v)| (bare_name(k), v)).collect();
                let mut lengths = arrays.values().map(|v| v.len());
                let len = lengths.next().unwrap_or(0);
                if lengths.any(|l| l != len) {
                    return Err(Error::usage(
                        "all parameter arrays in a batch must have the same length",
                    ));
                }
                let (sql, names) =
                    rewrite_named_placeholders(sql, |name| arrays.contains_key(name));
                let columns = names
                    .iter()
                    .map(|name| {
                        arrays.get(name.as_str()).copied().ok_or_else(|| {
                            Error::usage(format!("missing value for parameter '{name}'"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let rows = (0..len)
                    .map(|i| columns.iter().map(|values| values[i].clone()).collect())
                    .collect();
                Ok(Self { sql, rows })
            }
        }
    }
}

impl<S: ByteStream> MySqlSession<S> {
    /// Execute `sql` once per parameter set and return the summed affected
    /// rows.
    ///
    /// The batch stops at the first failing execution and returns its error.
    #[tracing::instrument(level = "debug", skip(self, cx, params))]
    pub async fn execute_batch(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: BatchParams<'_>,
        options: BatchOptions,
    ) -> Outcome<u64, Error> {
        let plan = match BatchPlan::new(sql, params) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        if plan.rows.is_empty() {
            return Outcome::Ok(0);
        }
        if options.transaction && self.in_transaction() {
            return Outcome::Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "batch transaction requested inside an active transaction".to_string(),
            }));
        }
        finish(cx, self.run_batch(cx, &plan, options).await)
    }

    async fn run_batch(&mut self, cx: &Cx, plan: &BatchPlan, options: BatchOptions) -> Result<u64, Error> {
        let pipelined = options.pipeline && self.config.pipelining;
        tracing::debug!(executions = plan.rows.len(), pipelined, "batch");

        if options.transaction {
            let begun = self.execute_inner(cx, "START TRANSACTION").await;
            self.leave(begun)?;
        }

        let prepared = self.prepare_inner(cx, &plan.sql).await;
        let stmt = self.leave(prepared)?;
        let executed = self.execute_plan(cx, stmt.id(), stmt.param_count(), plan, pipelined).await;
        self.deferred_close.push(stmt.id());
        let total = executed?;

        // Entering a new exchange closes the statement.
        let closed = self.enter(cx).await;
        self.leave(closed)?;

        if options.transaction {
            let committed = self.execute_inner(cx, "COMMIT").await;
            self.leave(committed)?;
        }
        Ok(total)
    }

    async fn execute_plan(
        &mut self,
        cx: &Cx,
        statement_id: u32,
        param_count: usize,
        plan: &BatchPlan,
        pipelined: bool,
    ) -> Result<u64, Error> {
        if plan.rows[0].len() != param_count {
            return Err(Error::usage(format!(
                "statement expects {param_count} parameters, batch supplies {}",
                plan.rows[0].len()
            )));
        }
        if pipelined {
            let result = self
                .execute_pipelined(cx, statement_id, &plan.sql, &plan.rows)
                .await;
            return self.leave(result);
        }
        let mut total = 0;
        for row in &plan.rows {
            let result = self.execute_one(cx, statement_id, &plan.sql, row).await;
            total += self.leave(result)?;
        }
        Ok(total)
    }

    async fn execute_one(
        &mut self,
        cx: &Cx,
        statement_id: u32,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, Error> {
        self.enter(cx).await?;
        self.send_execute(cx, statement_id, params, cursor::NO_CURSOR, true)
            .await?;
        let header = self.read_result_header(cx, true, Some(sql)).await?;
        self.consume_results(cx, header, Some(sql)).await
    }

    /// Write all executes, then read every reply so the stream stays
    /// aligned even after a failure. The first failure is returned.
    async fn execute_pipelined(
        &mut self,
        cx: &Cx,
        statement_id: u32,
        sql: &str,
        rows: &[Vec<Value>],
    ) -> Result<u64, Error> {
        self.enter(cx).await?;
        let mut reply_sequences = Vec::with_capacity(rows.len());
        for params in rows {
            self.send_execute(cx, statement_id, params, cursor::NO_CURSOR, false)
                .await?;
            reply_sequences.push(self.transport.sequence());
        }
        self.transport.flush().await?;

        let mut total = 0;
        let mut first_error = None;
        for (index, seq) in reply_sequences.into_iter().enumerate() {
            // Each reply restarts the sequence of its own execute.
            self.transport.set_sequence(seq);
            let reply = match self.read_result_header(cx, true, Some(sql)).await {
                Ok(header) => self.consume_results(cx, header, Some(sql)).await,
                Err(e) => Err(e),
            };
            match reply {
                Ok(affected) => total += affected,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    if first_error.is_none() {
                        tracing::debug!(index, error = %e, "batch execution failed; draining replies");
                        first_error = Some(e);
                    } else {
                        tracing::warn!(index, error = %e, "further batch failure");
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}
