use clap::Parser;
use secrecy::Secret;
use url::Url;

/// Where and as which bot to receive updates.
#[derive(Debug, Parser)]
pub(crate) struct ApiConfig {
    /// The base URL of the bot API server
    #[clap(
        short = 'H',
        long = "api-url",
        env = "LONGPOLL_API_URL",
        default_value = "https://api.telegram.org"
    )]
    pub(crate) api_url: Url,

    /// The token of the bot to receive updates for
    #[clap(long = "token", env = "LONGPOLL_BOT_TOKEN")]
    pub(crate) token: Secret<String>,
}
