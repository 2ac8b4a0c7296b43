//! Script registry: once-per-process handles for the atomic scripts.
//!
//! The registry submits all five script bodies via `SCRIPT LOAD` exactly
//! once: the first caller performs the load while concurrent callers
//! wait for its outcome, and that outcome - success or error - is cached
//! and replayed to every later caller. A failed initialization therefore
//! stays fatal to all five operations until the registry is rebuilt.
//!
//! Evaluation goes by digest (`EVALSHA`). If the engine has evicted a
//! script in the meantime, the call falls back to a full `EVAL` of the
//! cached body for that single invocation; process-wide initialization
//! is not re-run for the recovery.

use redis::aio::ConnectionLike;
use redis::Value;
use tokio::sync::OnceCell;

use weir_core::{WeirError, WeirResult};

use crate::scripts::{
    CLEAR_DIRTY_SCRIPT, GET_SCRIPT, LOAD_GET_SCRIPT, LOAD_SET_SCRIPT, SET_SCRIPT,
};

/// The five atomic operations, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Get,
    Set,
    LoadGet,
    LoadSet,
    ClearDirty,
}

impl ScriptKind {
    /// All kinds, in the order their digests are stored.
    pub const ALL: [ScriptKind; 5] = [
        ScriptKind::Get,
        ScriptKind::Set,
        ScriptKind::LoadGet,
        ScriptKind::LoadSet,
        ScriptKind::ClearDirty,
    ];

    /// Full script body, used for SCRIPT LOAD and the NOSCRIPT fallback.
    pub fn body(self) -> &'static str {
        match self {
            ScriptKind::Get => GET_SCRIPT,
            ScriptKind::Set => SET_SCRIPT,
            ScriptKind::LoadGet => LOAD_GET_SCRIPT,
            ScriptKind::LoadSet => LOAD_SET_SCRIPT,
            ScriptKind::ClearDirty => CLEAR_DIRTY_SCRIPT,
        }
    }

    fn index(self) -> usize {
        match self {
            ScriptKind::Get => 0,
            ScriptKind::Set => 1,
            ScriptKind::LoadGet => 2,
            ScriptKind::LoadSet => 3,
            ScriptKind::ClearDirty => 4,
        }
    }
}

/// Lazily initialized, process-shared script handles.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    digests: OnceCell<Result<[String; 5], WeirError>>,
}

impl ScriptRegistry {
    /// Create an uninitialized registry. The first evaluation triggers
    /// the load.
    pub fn new() -> Self {
        Self {
            digests: OnceCell::new(),
        }
    }

    /// Evaluate `kind` against the given connection.
    ///
    /// Keys and arguments are positional, exactly as the script bodies
    /// document them. The raw engine reply is returned for the caller
    /// to decode into a tagged type.
    pub async fn eval<C>(
        &self,
        conn: &mut C,
        kind: ScriptKind,
        keys: &[&str],
        args: &[&str],
    ) -> WeirResult<Value>
    where
        C: ConnectionLike + Send,
    {
        let sha = self.digest(conn, kind).await?;

        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(&sha).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }

        match cmd.query_async::<Value>(conn).await {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == redis::ErrorKind::NoScriptError => {
                // Engine evicted the script (restart, SCRIPT FLUSH).
                // Resubmit the full body for this call only.
                tracing::warn!(?kind, "script evicted by engine, resubmitting body");
                let mut cmd = redis::cmd("EVAL");
                cmd.arg(kind.body()).arg(keys.len());
                for key in keys {
                    cmd.arg(*key);
                }
                for arg in args {
                    cmd.arg(*arg);
                }
                cmd.query_async::<Value>(conn)
                    .await
                    .map_err(WeirError::engine)
            }
            Err(err) => Err(WeirError::engine(err)),
        }
    }

    /// Digest for `kind`, loading all five scripts on first use.
    async fn digest<C>(&self, conn: &mut C, kind: ScriptKind) -> WeirResult<String>
    where
        C: ConnectionLike + Send,
    {
        let outcome = self
            .digests
            .get_or_init(move || async move { Self::load_all(conn).await })
            .await;

        match outcome {
            Ok(digests) => Ok(digests[kind.index()].clone()),
            Err(err) => Err(err.clone()),
        }
    }

    async fn load_all<C>(conn: &mut C) -> Result<[String; 5], WeirError>
    where
        C: ConnectionLike + Send,
    {
        let mut digests: [String; 5] = Default::default();
        for kind in ScriptKind::ALL {
            let sha: String = redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(kind.body())
                .query_async(conn)
                .await
                .map_err(WeirError::engine)?;
            digests[kind.index()] = sha;
        }
        tracing::debug!("atomic scripts registered with cache engine");
        Ok(digests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_distinct_bodies() {
        for (i, a) in ScriptKind::ALL.iter().enumerate() {
            for b in &ScriptKind::ALL[i + 1..] {
                assert_ne!(a.body(), b.body());
            }
        }
    }

    #[test]
    fn test_indices_are_dense() {
        let mut seen = [false; 5];
        for kind in ScriptKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
