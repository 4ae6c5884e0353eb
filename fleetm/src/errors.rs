use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    /* transport failure talking to an agent */
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /* an agent answered, but not the way we expected */
    #[error("coordination with agent '{agent}' failed: {message}")]
    Coordination { agent: String, message: String },

    /* the watch stream broke, there is no safe way to resume it */
    #[error("watch error: {0}")]
    Watch(String),

    /* the dispatcher task is gone, it only stops after a fatal failure */
    #[error("dispatcher is not running")]
    DispatcherStopped,

    #[error("subscriber error: {0}")]
    Subscriber(String),

    #[error("`{0}`")]
    Other(String),
}

impl Error {

    pub fn coordination(agent: &str, message: impl Into<String>) -> Self {
	Error::Coordination{
	    agent: agent.to_string(),
	    message: message.into(),
	}
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
