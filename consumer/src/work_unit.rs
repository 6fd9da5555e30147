use serde::Deserialize;
use serde::Serialize;

/// Identifies the broker a `WorkUnit` should be fetched from.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> BrokerEndpoint {
        BrokerEndpoint {
            host: host.into(),
            port,
        }
    }
}

/// A request to fetch up to `len` messages from `(topic, partition)` starting at `offset`.
///
/// Work units are never mutated in place: claiming and settling move the *encoded* unit between
/// Redis lists, they do not rewrite its fields.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct WorkUnit {
    pub producer: BrokerEndpoint,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub len: i64,
}

impl WorkUnit {
    /// Exclusive upper bound of the offset window this unit covers.
    pub fn offset_ceiling(&self) -> i64 {
        self.offset + self.len
    }
}

/// Outcome of one settled worker cycle.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct WorkOutcome {
    #[serde(flatten)]
    pub unit: WorkUnit,
    pub status: Status,
    pub resp_data: Option<RespData>,
}

/// Settlement status of a work unit.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Fail,
}

/// Summary of what was actually delivered downstream for a settled unit.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct RespData {
    pub offset_read: i64,
}

/// A single Kafka record accepted by the Fetch Response Reader.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub bytes: Vec<u8>,
}

/// A broker-reported error observed while reading a fetch response.
///
/// Accumulated alongside messages; does not by itself fail the work unit (see the Reader).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FetchError {
    pub code: i32,
    pub description: String,
}

impl FetchError {
    pub fn new<S: Into<String>>(code: i32, description: S) -> FetchError {
        FetchError {
            code,
            description: description.into(),
        }
    }
}

/// One item produced while reading a fetch response: either an accepted-candidate message or an
/// error. Mirrors the tagged sentinel/payload model described for the fetch client (§9 of the
/// original design notes): callers classify by variant, never by runtime type.
#[derive(Clone, Debug)]
pub enum FetchItem {
    Message(Message),
    Error(FetchError),
}
