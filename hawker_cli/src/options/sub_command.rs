use clap::Subcommand;

/// Actions to run against the message box.
#[derive(Subcommand)]
pub enum Commands {
    /// Fetch conversations for every account with bounded concurrency.
    FETCH {
        /// Stop after this many conversations per account.
        #[clap(short, long)]
        max: Option<usize>,
        /// Resolve missing ad thumbnails through detail fetches.
        #[clap(short, long)]
        enrich_images: bool,
    },
    /// Send a text message in one conversation (first account).
    SEND {
        /// Conversation id or url.
        #[clap(short, long)]
        conversation: String,
        /// Message text.
        #[clap(short, long)]
        text: String,
    },
    /// Send a message with image attachments (first account).
    MEDIA {
        /// Conversation id or url.
        #[clap(short, long)]
        conversation: String,
        /// Accompanying message text.
        #[clap(short, long, default_value = "")]
        text: String,
        /// Image files to attach.
        #[clap(short, long, num_args = 1..)]
        files: Vec<std::path::PathBuf>,
    },
    /// Decline a payment/offer proposal (first account).
    DECLINE {
        /// Conversation id or url.
        #[clap(short, long)]
        conversation: String,
    },
}
