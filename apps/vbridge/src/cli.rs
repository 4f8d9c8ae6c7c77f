use clap::Parser;

#[derive(Parser)]
#[command(
    name = "vbridge",
    about = "OpenAI-compatible proxy in front of Vertex AI / Gemini"
)]
pub(crate) struct Cli {
    #[arg(short, long)]
    pub(crate) port: Option<u16>,
    #[arg(short, long)]
    pub(crate) bind: Option<String>,
    /// Proxy authentication key required from inbound callers.
    #[arg(short, long)]
    pub(crate) key: Option<String>,
    /// Background token refresh (default: on).
    #[arg(long)]
    pub(crate) auto_refresh: Option<bool>,
    /// Keep only well-known model name prefixes in listings (default: on).
    #[arg(long)]
    pub(crate) filter_model_names: Option<bool>,
    /// File holding the persisted token and optional proxy key.
    #[arg(long, default_value = "vbridge.json")]
    pub(crate) config: String,
}
