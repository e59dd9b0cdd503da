//! Fan-out rounds over a [`Transport`].
//!
//! A round is a set of commands sent concurrently and joined all-of-N. When
//! any command times out or loses its reply, the whole round is re-sent with
//! the same command ids; receivers answer repeats from their command log.

use std::time::Duration;

use fastrestore_config::RpcConfig;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::message::{Command, ReplyBody};
use crate::transport::Transport;
use crate::{Error, Result};

/// Deadline and retry budget of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPolicy {
    /// Per-command deadline; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Re-sends after the first attempt.
    pub max_retries: u32,
}

impl RoundPolicy {
    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            timeout: Some(config.round_timeout()),
            max_retries: config.max_round_retries,
        }
    }

    /// The same retry budget without a deadline.
    pub fn without_timeout(self) -> Self {
        Self {
            timeout: None,
            ..self
        }
    }
}

/// Sends every command concurrently and returns the outcomes in input order.
pub async fn fan_out<T: Transport>(
    transport: &T,
    commands: Vec<Command>,
    timeout: Option<Duration>,
) -> Vec<Result<ReplyBody>> {
    let count = commands.len();
    let mut tasks = JoinSet::new();
    for (index, command) in commands.into_iter().enumerate() {
        let transport = transport.clone();
        tasks.spawn(async move { (index, send_one(&transport, command, timeout).await) });
    }

    let mut outcomes: Vec<Option<Result<ReplyBody>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => warn!(error = %e, "rpc task failed"),
        }
    }
    outcomes
        .into_iter()
        .map(|outcome| {
            outcome.unwrap_or_else(|| Err(Error::Transport("rpc task did not complete".to_string())))
        })
        .collect()
}

async fn send_one<T: Transport>(
    transport: &T,
    command: Command,
    timeout: Option<Duration>,
) -> Result<ReplyBody> {
    let (node, name) = (command.to, command.name());
    let reply = match timeout {
        Some(limit) => tokio::time::timeout(limit, transport.send(command))
            .await
            .map_err(|_| Error::RpcTimeout { node, command: name })??,
        None => transport.send(command).await?,
    };
    reply.outcome.map_err(|error| Error::Remote {
        node,
        command: name,
        error,
    })
}

/// Sends `commands` as one round, re-sending the whole round on retryable
/// failures.
///
/// # Errors
///
/// Non-retryable failures are returned as is. A round still failing after
/// `policy.max_retries` re-sends yields [`Error::RoundFailed`].
pub async fn send_round<T: Transport>(
    transport: &T,
    round: &'static str,
    commands: &[Command],
    policy: RoundPolicy,
) -> Result<Vec<ReplyBody>> {
    if commands.is_empty() {
        return Ok(Vec::new());
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(round, attempt, commands = commands.len(), "sending round");

        let mut bodies = Vec::with_capacity(commands.len());
        let mut retryable = None;
        for outcome in fan_out(transport, commands.to_vec(), policy.timeout).await {
            match outcome {
                Ok(body) => bodies.push(body),
                Err(e) if e.is_retryable() => {
                    retryable.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match retryable {
            None => return Ok(bodies),
            Some(last) if attempt > policy.max_retries => {
                return Err(Error::RoundFailed {
                    round,
                    attempts: attempt,
                    last: Box::new(last),
                });
            }
            Some(last) => warn!(round, attempt, error = %last, "re-sending round"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CommandPayload, Reply};
    use crate::transport::{Envelope, FaultConfig, LocalNetwork};
    use fastrestore_types::{CommandId, NodeId, Phase};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    /// Acks commands, executing each id once.
    fn spawn_counter(node: NodeId, mut inbox: mpsc::Receiver<Envelope>) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let mut executed: HashMap<CommandId, Reply> = HashMap::new();
            while let Some(envelope) = inbox.recv().await {
                let id = envelope.command.id;
                let reply = executed
                    .entry(id)
                    .or_insert_with(|| Reply::ack(node, id))
                    .clone();
                let _ = envelope.reply.send(reply);
            }
            executed.len()
        })
    }

    fn round(nodes: &[NodeId]) -> Vec<Command> {
        let mut id = CommandId::initial();
        nodes
            .iter()
            .map(|&to| {
                Command::new(
                    id.next_in(1, Phase::ResetBatch),
                    NodeId::MASTER,
                    to,
                    CommandPayload::ResetVersionBatch,
                )
            })
            .collect()
    }

    fn policy() -> RoundPolicy {
        RoundPolicy {
            timeout: Some(Duration::from_secs(5)),
            max_retries: 20,
        }
    }

    #[tokio::test]
    async fn test_fan_out_keeps_order() {
        let network = LocalNetwork::new();
        let mut nodes = Vec::new();
        for _ in 0..4 {
            let (node, inbox) = network.register().await;
            spawn_counter(node, inbox);
            nodes.push(node);
        }

        let outcomes = fan_out(&network, round(&nodes), None).await;
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| matches!(o, Ok(ReplyBody::Ack))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_receiver_times_out() {
        let network = LocalNetwork::new();
        let (node, inbox) = network.register().await;
        // Keep the inbox open but never answer.
        let _held = inbox;

        let policy = RoundPolicy {
            timeout: Some(Duration::from_millis(10)),
            max_retries: 2,
        };
        let err = send_round(&network, "reset", &round(&[node]), policy)
            .await
            .unwrap_err();
        match err {
            Error::RoundFailed { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::RpcTimeout { .. }));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_lost_replies_are_resent_with_same_ids() {
        let network = LocalNetwork::with_faults(FaultConfig::new(11).with_dropped_replies(0.2));
        let (node, inbox) = network.register().await;
        let executed = spawn_counter(node, inbox);

        let commands = round(&[node, node, node]);
        let bodies = send_round(&network, "reset", &commands, policy()).await.unwrap();
        assert_eq!(bodies.len(), 3);

        drop(network);
        assert_eq!(executed.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_remote_error_is_not_retried() {
        let network = LocalNetwork::new();
        let (node, mut inbox) = network.register().await;
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let reply = Reply {
                    worker: node,
                    id: envelope.command.id,
                    outcome: Err(crate::message::RemoteError {
                        kind: crate::message::RemoteErrorKind::Protocol,
                        message: "no".to_string(),
                    }),
                };
                let _ = envelope.reply.send(reply);
            }
        });

        let err = send_round(&network, "reset", &round(&[node]), policy())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
    }
}
