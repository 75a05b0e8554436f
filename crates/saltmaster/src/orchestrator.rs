//! Salt master provisioning run.
//!
//! The run is a small dependency graph:
//!
//! ```text
//! ReserveAddress ─────────────────────────────┬──────────────┬─> AttachAddress ─┐
//! PeerToken ─> ComposeBootstrap ─> CreateInstance ─────────────┘                  ├─> PublishResult
//!     └──────────────────────────────────────── DnsRecord (address + token) ─────┘
//! ```
//!
//! Address reservation and token generation start together. The instance
//! only needs the rendered payload, so it boots while the address is being
//! reserved. The DNS record needs only the address, and is held back until
//! the token has resolved so a failed token never leaves a record behind.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bootstrap::{
    teleport_domain, BootstrapConfig, BootstrapConfigBuilder, CloudInitComposer, ComposeError,
    Composer,
};
use crate::config::{BillingCycle, ConfigError, OperatingSystem, ProvisioningRequest};
use crate::dataflow::{Deferred, Outcome, Pipeline};
use crate::error::{ProvisionError, StepCause};
use crate::outputs::{OutputRegistry, ProvisioningResult};
use crate::providers::{
    AttachAddressRequest, CreateInstanceRequest, CreateRecordRequest, DnsProvider, DnsRecord,
    Instance, IpAttachment, MetalProvider, PeerToken, ProviderError, ReserveAddressRequest,
    ReservedAddress, TokenSource,
};
use crate::state::{fingerprint, Recorded, Retired, StackState};

pub use crate::dataflow::{JournalEntry, Phase, RunJournal};
pub use crate::error::Step;

/// Tag identifying the salt master instance.
pub const SALT_MASTER_TAG: &str = "role:salt-master";

/// Record type of the Teleport DNS record.
const RECORD_TYPE_A: &str = "A";

type SharedState = Arc<Mutex<StackState>>;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Provisioned {
    /// Exported addresses.
    pub result: ProvisioningResult,
    /// Outputs as written to the registry.
    pub outputs: OutputRegistry,
    /// Superseded resources that could not be deleted yet.
    pub retired_pending: Vec<Retired>,
}

/// Runs the salt master pipeline against a set of providers.
pub struct Orchestrator {
    metal: Arc<dyn MetalProvider>,
    dns: Arc<dyn DnsProvider>,
    tokens: Arc<dyn TokenSource>,
    composer: Arc<dyn Composer>,
}

impl Orchestrator {
    /// Create an orchestrator that renders the cloud-init payload.
    ///
    /// # Errors
    /// Returns [`ComposeError`] if the bootstrap template does not compile.
    pub fn new(
        metal: Arc<dyn MetalProvider>,
        dns: Arc<dyn DnsProvider>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, ComposeError> {
        Ok(Self {
            metal,
            dns,
            tokens,
            composer: Arc::new(CloudInitComposer::new()?),
        })
    }

    /// Use a different bootstrap composer.
    #[must_use]
    pub fn with_composer(mut self, composer: Arc<dyn Composer>) -> Self {
        self.composer = composer;
        self
    }

    /// Provision the salt master described by `request`.
    ///
    /// # Errors
    /// Returns the configuration error, or the first step failure.
    pub async fn run(
        &self,
        request: &ProvisioningRequest,
        state: &mut StackState,
    ) -> Result<Provisioned, ProvisionError> {
        self.run_with_journal(request, state, &RunJournal::new()).await
    }

    /// Like [`Orchestrator::run`], recording step transitions in `journal`.
    ///
    /// `state` is updated with every resource created, including those
    /// created before a failure, so a re-run can pick up where this one
    /// stopped.
    ///
    /// # Errors
    /// Returns the configuration error, or the first step failure.
    pub async fn run_with_journal(
        &self,
        request: &ProvisioningRequest,
        state: &mut StackState,
        journal: &RunJournal,
    ) -> Result<Provisioned, ProvisionError> {
        request.validate()?;
        if state.name != request.stack {
            return Err(ConfigError::Invalid {
                field: "stack",
                message: format!(
                    "state belongs to stack '{}', request targets '{}'",
                    state.name, request.stack
                ),
            }
            .into());
        }

        info!(
            stack = %request.stack,
            facility = %request.salt_master.facility,
            plan = %request.salt_master.plan,
            "Provisioning salt master"
        );

        let shared: SharedState = Arc::new(Mutex::new(state.clone()));
        let pipeline = Pipeline::new(journal.clone());

        let address = self.reserve_address(&pipeline, &shared, request);
        let token = self.request_peer_token(&pipeline, &shared);
        let user_data =
            self.compose_bootstrap(&pipeline, BootstrapConfig::builder(request), token.clone());
        let instance = self.create_instance(&pipeline, &shared, request, user_data);
        let attachment =
            self.attach_address(&pipeline, &shared, address.clone(), instance.clone());
        let record = self.create_dns_record(&pipeline, &shared, request, address.clone(), token);
        let published =
            Self::publish_result(&pipeline, &shared, address, instance, attachment, record);

        let outcome = pipeline.finish(published).await;
        *state = shared.lock().await.clone();

        let result = match outcome {
            Ok(result) => result,
            Err(failure) => {
                warn!(step = %failure.step, error = %failure.cause, "Provisioning failed");
                return Err(failure.into());
            }
        };

        let retired_pending = self.delete_retired(state).await;
        state.save()?;

        info!(
            eip = %result.salt_master_eip,
            ip = %result.salt_master_ip,
            "Salt master provisioned"
        );

        Ok(Provisioned {
            outputs: state.outputs.clone(),
            result,
            retired_pending,
        })
    }

    /// Reserve one public address in the salt master's facility.
    fn reserve_address(
        &self,
        pipeline: &Pipeline,
        state: &SharedState,
        request: &ProvisioningRequest,
    ) -> Deferred<ReservedAddress> {
        let metal = self.metal.clone();
        let state = state.clone();
        let project_id = request.project_id.clone();
        let req = ReserveAddressRequest {
            facility: request.salt_master.facility,
            quantity: 1,
        };

        pipeline.node(Step::ReserveAddress, Deferred::resolved(()), move |()| async move {
            let fp = fingerprint(&(&project_id, &req)).map_err(ProviderError::from)?;
            if let Some(address) = recorded(&state, |s| s.reserved_address.as_ref(), &fp).await {
                info!(address = %address.address, "Reusing reserved address");
                return Ok(Outcome::Reused(address));
            }

            let address = metal.reserve_address(req).await?;
            info!(address = %address.address, "Address reserved");

            let kept = address.clone();
            update(&state, move |s| {
                if let Some(old) = s.reserved_address.replace(Recorded::new(fp, kept)) {
                    s.retire(Retired::Address(old.resource.id));
                }
            })
            .await?;
            Ok(Outcome::Completed(address))
        })
    }

    /// Obtain the peer token, reusing the one recorded for the stack.
    fn request_peer_token(&self, pipeline: &Pipeline, state: &SharedState) -> Deferred<PeerToken> {
        let tokens = self.tokens.clone();
        let state = state.clone();

        pipeline.node(Step::PeerToken, Deferred::resolved(()), move |()| async move {
            if let Some(token) = state.lock().await.peer_token.clone() {
                return Ok(Outcome::Reused(token));
            }

            let token = tokens.generate_token().await?;
            info!("Peer token generated");

            let kept = token.clone();
            update(&state, move |s| s.peer_token = Some(kept)).await?;
            Ok(Outcome::Completed(token))
        })
    }

    /// Render the payload once the token is known.
    fn compose_bootstrap(
        &self,
        pipeline: &Pipeline,
        builder: BootstrapConfigBuilder,
        token: Deferred<PeerToken>,
    ) -> Deferred<String> {
        let composer = self.composer.clone();

        pipeline.node(Step::ComposeBootstrap, token, move |token| async move {
            let config = builder.peer_token(&token);
            composer
                .compose(&config)
                .map(Outcome::Completed)
                .map_err(|e| StepCause::Compose(e.to_string()))
        })
    }

    /// Create the instance with the rendered payload as user-data.
    fn create_instance(
        &self,
        pipeline: &Pipeline,
        state: &SharedState,
        request: &ProvisioningRequest,
        user_data: Deferred<String>,
    ) -> Deferred<Instance> {
        let metal = self.metal.clone();
        let state = state.clone();
        let project_id = request.project_id.clone();
        let hostname = request.hostname();
        let plan = request.salt_master.plan;
        let facility = request.salt_master.facility;

        pipeline.node(Step::CreateInstance, user_data, move |user_data| async move {
            let req = CreateInstanceRequest {
                hostname,
                plan,
                facilities: vec![facility],
                operating_system: OperatingSystem::Ubuntu2004,
                tags: vec![SALT_MASTER_TAG.to_string()],
                billing_cycle: BillingCycle::Hourly,
                user_data,
            };
            let fp = fingerprint(&(&project_id, &req)).map_err(ProviderError::from)?;
            let pending = match recorded(&state, |s| s.instance.as_ref(), &fp).await {
                Some(instance) if instance.is_active() => {
                    info!(instance_id = %instance.id, "Reusing instance");
                    return Ok(Outcome::Reused(instance));
                }
                Some(instance) => {
                    info!(instance_id = %instance.id, state = %instance.state, "Resuming instance");
                    instance
                }
                None => {
                    // Recorded before waiting so a failed wait never loses the device.
                    let instance = metal.create_instance(req).await?;
                    info!(instance_id = %instance.id, "Instance created");

                    let kept = instance.clone();
                    let recorded_fp = fp.clone();
                    update(&state, move |s| {
                        if let Some(old) = s.instance.replace(Recorded::new(recorded_fp, kept)) {
                            s.retire(Retired::Instance(old.resource.id));
                        }
                    })
                    .await?;
                    instance
                }
            };

            let instance = match metal.wait_active(&pending.id).await {
                Ok(instance) => instance,
                Err(err @ ProviderError::ResourceFailed(_)) => {
                    warn!(instance_id = %pending.id, "Instance failed to provision, retiring it");
                    update(&state, move |s| {
                        s.instance = None;
                        s.retire(Retired::Instance(pending.id));
                    })
                    .await?;
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            };
            info!(instance_id = %instance.id, ipv4 = ?instance.public_ipv4, "Instance active");

            let kept = instance.clone();
            update(&state, move |s| s.instance = Some(Recorded::new(fp, kept))).await?;
            Ok(Outcome::Completed(instance))
        })
    }

    /// Bind the reserved address to the instance.
    ///
    /// A binding left by an earlier run for a different instance or address
    /// is deleted before the new one is created.
    fn attach_address(
        &self,
        pipeline: &Pipeline,
        state: &SharedState,
        address: Deferred<ReservedAddress>,
        instance: Deferred<Instance>,
    ) -> Deferred<IpAttachment> {
        let metal = self.metal.clone();
        let state = state.clone();

        pipeline.node(
            Step::AttachAddress,
            address.zip(instance),
            move |(address, instance)| async move {
                let req = AttachAddressRequest {
                    instance_id: instance.id,
                    cidr_notation: address.cidr_notation,
                    delete_before_replace: true,
                };
                let fp = fingerprint(&(&req.instance_id, &req.cidr_notation))
                    .map_err(ProviderError::from)?;

                let previous = state.lock().await.attachment.clone();
                if let Some(attachment) = previous.as_ref().and_then(|p| p.matching(&fp)) {
                    info!(attachment_id = %attachment.id, "Reusing address attachment");
                    return Ok(Outcome::Reused(attachment.clone()));
                }

                if let Some(old) = &previous {
                    info!(attachment_id = %old.resource.id, "Deleting previous address attachment");
                    metal.detach_address(&old.resource.id).await?;
                    update(&state, |s| s.attachment = None).await?;
                }

                let attachment = metal.attach_address(req).await?;
                info!(attachment_id = %attachment.id, "Address attached");

                let kept = attachment.clone();
                update(&state, move |s| s.attachment = Some(Recorded::new(fp, kept))).await?;
                Ok(Outcome::Completed(attachment))
            },
        )
    }

    /// Point the Teleport domain at the reserved address.
    fn create_dns_record(
        &self,
        pipeline: &Pipeline,
        state: &SharedState,
        request: &ProvisioningRequest,
        address: Deferred<ReservedAddress>,
        token: Deferred<PeerToken>,
    ) -> Deferred<DnsRecord> {
        let dns = self.dns.clone();
        let state = state.clone();
        let zone = request.zone.trim_end_matches('.').to_string();
        let domain = teleport_domain(&request.zone);

        pipeline.node(
            Step::DnsRecord,
            address.zip(token.map(|_| ())),
            move |(address, ())| async move {
                let req = CreateRecordRequest {
                    zone,
                    domain,
                    record_type: RECORD_TYPE_A.to_string(),
                    answers: vec![address.address],
                };
                let fp = fingerprint(&req).map_err(ProviderError::from)?;
                if let Some(record) = recorded(&state, |s| s.dns_record.as_ref(), &fp).await {
                    info!(domain = %record.domain, "Reusing DNS record");
                    return Ok(Outcome::Reused(record));
                }

                let record = dns.upsert_record(req).await?;
                info!(domain = %record.domain, answers = ?record.answers, "DNS record published");

                let kept = record.clone();
                update(&state, move |s| s.dns_record = Some(Recorded::new(fp, kept))).await?;
                Ok(Outcome::Completed(record))
            },
        )
    }

    /// Export the addresses once the instance is fully wired.
    fn publish_result(
        pipeline: &Pipeline,
        state: &SharedState,
        address: Deferred<ReservedAddress>,
        instance: Deferred<Instance>,
        attachment: Deferred<IpAttachment>,
        record: Deferred<DnsRecord>,
    ) -> Deferred<ProvisioningResult> {
        let state = state.clone();
        let inputs = address.zip(instance).zip(attachment.zip(record));

        pipeline.node(
            Step::PublishResult,
            inputs,
            move |((address, instance), _wired)| async move {
                let salt_master_ip = instance.public_ipv4.ok_or_else(|| {
                    StepCause::Output(format!("instance {} has no public IPv4", instance.id))
                })?;
                let result = ProvisioningResult {
                    salt_master_eip: address.address,
                    salt_master_ip,
                };

                let mut registry = OutputRegistry::new();
                result
                    .publish(&mut registry)
                    .map_err(|e| StepCause::Output(e.to_string()))?;
                update(&state, move |s| s.outputs = registry).await?;
                Ok(Outcome::Completed(result))
            },
        )
    }

    /// Delete resources superseded by this run. Failures are kept for the next run.
    async fn delete_retired(&self, state: &mut StackState) -> Vec<Retired> {
        let mut pending = Vec::new();
        for resource in std::mem::take(&mut state.retired) {
            let deleted = match &resource {
                Retired::Instance(id) => self.metal.delete_instance(id).await,
                Retired::Address(id) => self.metal.release_address(id).await,
            };
            match deleted {
                Ok(()) => info!(resource = ?resource, "Deleted superseded resource"),
                Err(e) => {
                    warn!(resource = ?resource, error = %e, "Failed to delete superseded resource");
                    pending.push(resource);
                }
            }
        }
        state.retired.clone_from(&pending);
        pending
    }
}

/// The recorded resource selected by `select`, if its fingerprint matches.
async fn recorded<T, F>(state: &SharedState, select: F, fp: &str) -> Option<T>
where
    T: Clone,
    F: FnOnce(&StackState) -> Option<&Recorded<T>>,
{
    let state = state.lock().await;
    select(&state).and_then(|r| r.matching(fp)).cloned()
}

/// Apply `change` to the shared state and persist it.
async fn update<F>(state: &SharedState, change: F) -> Result<(), StepCause>
where
    F: FnOnce(&mut StackState),
{
    let mut state = state.lock().await;
    change(&mut state);
    state.save().map_err(|e| StepCause::State(format!("{e:#}")))
}
