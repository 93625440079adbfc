//! CLI configuration for `mwhost-example`.
//!
//! Run modes:
//!   mwhost-example                                 in-process demo server
//!   mwhost-example --redirect-to backup            demo server redirects the first login
//!   mwhost-example --tcp --host 10.0.0.5 --port 1533

use clap::Parser;

// ---

use mwhost_domain::{Endpoint, Identity};
use mwhost_session::SessionConfig;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "mwhost-example", about = "mwhost session host demo runner")]
pub struct Config {
    // ---
    /// Server host to log in through.
    #[arg(long, env = "MW_HOST", default_value = "community.example.com")]
    pub host: String,

    #[arg(long, env = "MW_PORT", default_value_t = 1533)]
    pub port: u16,

    #[arg(long, env = "MW_USER", default_value = "demo")]
    pub user: String,

    #[arg(long, env = "MW_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Run the pump loop on a background worker thread instead of the
    /// calling thread.
    #[arg(long, default_value_t = false)]
    pub background: bool,

    /// Detach the background worker (implies `--background`).
    #[arg(long, default_value_t = false)]
    pub detach: bool,

    /// Have the demo server redirect the first login to this host.
    #[arg(long)]
    pub redirect_to: Option<String>,

    /// Dial `--host:--port` over real TCP instead of the in-process server.
    #[arg(long, default_value_t = false)]
    pub tcp: bool,

    /// Bytes read from the connection per pump iteration.
    #[arg(long, default_value_t = 1024)]
    pub read_chunk: usize,
}

// ---

impl Config {
    // ---
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.user.clone(), self.password.clone())
    }

    pub fn background(&self) -> bool {
        self.background || self.detach
    }

    pub fn session_config(&self) -> SessionConfig {
        // ---
        let config = SessionConfig::default().with_read_chunk(self.read_chunk);
        if self.detach {
            config.detached()
        } else {
            config
        }
    }
}
