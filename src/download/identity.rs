//! Client identity rotation for the secondary provider
//!
//! Every secondary call takes the next identity from a fixed pool in round-robin
//! order. The cursor is a single atomic counter, so concurrent callers never
//! observe the same position twice within one cycle.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::error::{AppError, AppResult};

/// Request headers and innertube client context presented to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Short name for logs
    pub name: String,
    pub user_agent: String,
    /// innertube `context.client.clientName`
    pub client_name: String,
    /// innertube `context.client.clientVersion`
    pub client_version: String,
    /// Numeric id sent as `X-YouTube-Client-Name`
    pub client_id: u32,
}

impl ClientIdentity {
    pub fn new(
        name: impl Into<String>,
        user_agent: impl Into<String>,
        client_name: impl Into<String>,
        client_version: impl Into<String>,
        client_id: u32,
    ) -> Self {
        Self {
            name: name.into(),
            user_agent: user_agent.into(),
            client_name: client_name.into(),
            client_version: client_version.into(),
            client_id,
        }
    }
}

/// Built-in pool used when no other pool is configured.
pub fn default_pool() -> Vec<ClientIdentity> {
    vec![
        ClientIdentity::new(
            "android_vr",
            "com.google.android.apps.youtube.vr.oculus/1.60.19 (Linux; U; Android 12L; eureka-user Build/SQ3A.220605.009.A1) gzip",
            "ANDROID_VR",
            "1.60.19",
            28,
        ),
        ClientIdentity::new(
            "ios",
            "com.google.ios.youtube/20.10.4 (iPhone16,2; U; CPU iOS 18_3_2 like Mac OS X;)",
            "IOS",
            "20.10.4",
            5,
        ),
        ClientIdentity::new(
            "tv_embedded",
            "Mozilla/5.0 (PlayStation; PlayStation 4/12.02) AppleWebKit/605.1.15 (KHTML, like Gecko)",
            "TVHTML5_SIMPLY_EMBEDDED_PLAYER",
            "2.0",
            85,
        ),
    ]
}

/// Round-robin selector over a fixed, non-empty identity pool.
#[derive(Debug)]
pub struct IdentityRotator {
    pool: Vec<ClientIdentity>,
    cursor: AtomicUsize,
}

static SHARED: Lazy<Arc<IdentityRotator>> = Lazy::new(|| {
    Arc::new(IdentityRotator {
        pool: default_pool(),
        cursor: AtomicUsize::new(0),
    })
});

impl IdentityRotator {
    /// Creates a rotator; the pool must not be empty.
    pub fn new(pool: Vec<ClientIdentity>) -> AppResult<Self> {
        if pool.is_empty() {
            return Err(AppError::Input("identity pool must not be empty".to_string()));
        }
        Ok(Self {
            pool,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Process-wide rotator over the default pool.
    pub fn shared() -> Arc<IdentityRotator> {
        Arc::clone(&SHARED)
    }

    /// Returns the identity under the cursor and advances the cursor by one.
    pub fn next(&self) -> ClientIdentity {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        log::debug!("Using client identity {} ({})", self.pool[index].name, index);
        self.pool[index].clone()
    }

    /// Position the next call to `next` will return.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed) % self.pool.len()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
