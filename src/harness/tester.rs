//! The harness state machine

use crate::control::{ConnectionDescriptor, ControlPlane, PublishState};
use crate::core::config::HarnessConfig;
use crate::harness::channel::{CorrelationChannel, Reply};
use crate::harness::classify::{classify, CapabilityStatus};
use crate::harness::envelope::{capabilities_from_result, CapabilityDescriptor};
use crate::harness::report::{CapabilityResult, HarnessPhase, HarnessReport};
use crate::harness::synth::{synthesize_arguments, ArgumentSynthesizer};
use crate::harness::{ChannelError, HarnessError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EXCERPT_LEN: usize = 200;

/// Opens correlation channels to a provisioned instance
#[async_trait::async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        session_timeout: Duration,
    ) -> Result<CorrelationChannel, ChannelError>;
}

/// Connects over server-sent events
pub struct SseConnector;

#[async_trait::async_trait]
impl ChannelConnector for SseConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        session_timeout: Duration,
    ) -> Result<CorrelationChannel, ChannelError> {
        CorrelationChannel::open(&descriptor.url, &descriptor.headers, session_timeout).await
    }
}

fn excerpt(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(EXCERPT_LEN).collect()
}

/// Drives one provision-test-restore cycle against a template
pub struct CapabilityTestHarness {
    control: Arc<ControlPlane>,
    connector: Arc<dyn ChannelConnector>,
    synthesizer: Option<Arc<dyn ArgumentSynthesizer>>,
    config: HarnessConfig,
}

impl CapabilityTestHarness {
    pub fn new(
        control: Arc<ControlPlane>,
        connector: Arc<dyn ChannelConnector>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            control,
            connector,
            synthesizer: None,
            config,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn ArgumentSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Run every phase. Fatal failures are recorded in the report, never returned.
    pub async fn run(&self, template_id: &str) -> HarnessReport {
        let started = Instant::now();
        let mut report = HarnessReport::new(template_id, self.config.pass_threshold);
        info!("Testing capabilities of template {}", template_id);

        if let Err(error) = self.drive(template_id, &mut report).await {
            warn!("Harness for {} aborted: {}", template_id, error);
            report.record_fatal(&error, started.elapsed().as_millis() as u64);
        }

        // Always attempted, whatever happened above
        let phase_started = Instant::now();
        match self
            .control
            .set_publish_state(template_id, PublishState::Live)
            .await
        {
            Ok(()) => {
                report.restored = true;
                report.record_phase(
                    HarnessPhase::RestoringPublishState,
                    true,
                    "publish state back to live",
                    phase_started.elapsed().as_millis() as u64,
                );
            }
            Err(e) => {
                warn!("Could not restore publish state of {}: {}", template_id, e);
                report.record_phase(
                    HarnessPhase::RestoringPublishState,
                    false,
                    e.to_string(),
                    phase_started.elapsed().as_millis() as u64,
                );
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        report.record_phase(HarnessPhase::Done, report.is_success(), report.summary(), 0);
        info!("Harness for {} finished: {}", template_id, report.summary());
        report
    }

    async fn drive(&self, template_id: &str, report: &mut HarnessReport) -> Result<(), HarnessError> {
        let t = Instant::now();
        self.control
            .create_instance(template_id)
            .await
            .map_err(|e| HarnessError::new(HarnessPhase::Provisioning, e.to_string()))?;
        report.record_phase(HarnessPhase::Provisioning, true, "instance requested", ms(t));

        let t = Instant::now();
        self.control
            .set_publish_state(template_id, PublishState::Test)
            .await
            .map_err(|e| HarnessError::new(HarnessPhase::EnteringTestState, e.to_string()))?;
        report.record_phase(HarnessPhase::EnteringTestState, true, "publish state set to test", ms(t));

        let t = Instant::now();
        let instance_id = self
            .control
            .resolve_instance_id(template_id)
            .await
            .map_err(|e| HarnessError::new(HarnessPhase::ResolvingInstance, e.to_string()))?;
        report.record_phase(HarnessPhase::ResolvingInstance, true, format!("instance {}", instance_id), ms(t));

        let t = Instant::now();
        let descriptor = self
            .control
            .resolve_connection(&instance_id)
            .await
            .map_err(|e| HarnessError::new(HarnessPhase::ResolvingConnection, e.to_string()))?;
        report.record_phase(HarnessPhase::ResolvingConnection, true, descriptor.url.clone(), ms(t));

        let t = Instant::now();
        let attempts = self.await_ready(&descriptor, report).await?;
        report.record_phase(
            HarnessPhase::AwaitingReady,
            true,
            format!("reachable after {} attempt(s)", attempts),
            ms(t),
        );

        let t = Instant::now();
        let (mut channel, capabilities) = self.enumerate(&descriptor).await?;
        report.record_phase(
            HarnessPhase::EnumeratingCapabilities,
            true,
            format!("{} capabilities", capabilities.len()),
            ms(t),
        );

        let t = Instant::now();
        for capability in &capabilities {
            let result = self.invoke(&mut channel, capability).await;
            debug!("Capability {} -> {}", result.name, result.status);
            report.capabilities.push(result);
        }
        channel.close();
        report.record_phase(
            HarnessPhase::InvokingCapabilities,
            true,
            format!(
                "{} passed, {} partial of {}",
                report.count(CapabilityStatus::Passed),
                report.count(CapabilityStatus::Partial),
                report.total()
            ),
            ms(t),
        );

        Ok(())
    }

    /// Poll until a channel opens or the ceiling passes. Returns the attempt count.
    async fn await_ready(
        &self,
        descriptor: &ConnectionDescriptor,
        report: &mut HarnessReport,
    ) -> Result<usize, HarnessError> {
        let deadline = Instant::now() + self.config.ready_ceiling();
        let interval = self.config.ready_interval();
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            let outcome = tokio::time::timeout_at(
                deadline,
                self.connector
                    .connect(descriptor, self.config.session_timeout()),
            )
            .await;

            let last_error = match outcome {
                Ok(Ok(mut channel)) => {
                    channel.close();
                    return Ok(attempts);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "readiness ceiling reached while connecting".to_string(),
            };
            debug!("Readiness attempt {} failed: {}", attempts, last_error);

            if Instant::now() + interval >= deadline {
                report.diagnostics = vec![
                    "the package may be unavailable on the registry or failed to download".to_string(),
                    "the start command may be wrong".to_string(),
                    "dependency installation may have failed".to_string(),
                    format!("last connection error: {}", last_error),
                ];
                return Err(HarnessError::new(
                    HarnessPhase::AwaitingReady,
                    format!(
                        "instance not reachable within {:?} ({} attempts)",
                        self.config.ready_ceiling(),
                        attempts
                    ),
                ));
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn enumerate(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<(CorrelationChannel, Vec<CapabilityDescriptor>), HarnessError> {
        let phase = HarnessPhase::EnumeratingCapabilities;
        let mut channel = self
            .connector
            .connect(descriptor, self.config.session_timeout())
            .await
            .map_err(|e| HarnessError::new(phase, e.to_string()))?;

        let reply = channel
            .send("tools/list", json!({}), self.config.list_timeout())
            .await
            .map_err(|e| HarnessError::new(phase, e.to_string()))?;

        let message = match reply {
            Reply::Response(message) => message,
            Reply::TimedOut => {
                return Err(HarnessError::new(
                    phase,
                    format!("no capability list within {:?}", self.config.list_timeout()),
                ))
            }
        };
        if let Some(error) = &message.error {
            return Err(HarnessError::new(phase, format!("listing rejected: {}", error)));
        }
        let result = message.result.unwrap_or(Value::Null);
        let capabilities = capabilities_from_result(&result)
            .map_err(|e| HarnessError::new(phase, format!("malformed capability list: {}", e)))?;

        Ok((channel, capabilities))
    }

    /// Never fails: every problem becomes this capability's classification
    async fn invoke(
        &self,
        channel: &mut CorrelationChannel,
        capability: &CapabilityDescriptor,
    ) -> CapabilityResult {
        let arguments = synthesize_arguments(capability, self.synthesizer.as_deref()).await;
        let params = json!({ "name": capability.name, "arguments": arguments.clone() });

        let (status, excerpt) = match channel
            .send("tools/call", params, self.config.invoke_timeout())
            .await
        {
            Ok(reply) => {
                let status = classify(&reply);
                let text = match &reply {
                    Reply::TimedOut => format!("no response within {:?}", self.config.invoke_timeout()),
                    Reply::Response(message) => match (&message.error, &message.result) {
                        (Some(error), _) => excerpt(error),
                        (None, Some(result)) => excerpt(result),
                        (None, None) => String::new(),
                    },
                };
                (status, text)
            }
            Err(e) => (CapabilityStatus::Failed, e.to_string()),
        };

        CapabilityResult {
            name: capability.name.clone(),
            status,
            arguments,
            excerpt,
        }
    }
}

fn ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
