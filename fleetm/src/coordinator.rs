use crate::pool::AgentEvent;
use crate::podio::PodCoordinationIo;

use fleet_api as api;
use fleet_api::ResourceName;
use futures::FutureExt;
use log;
use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/* resource -> uid of the agent that should hold it */
pub type DesiredAssignments = BTreeMap<ResourceName, String>;

/* What one tick ended up doing */
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    // the converged assignment, empty when no agent answered
    pub leaders: DesiredAssignments,

    // number of assign calls issued, failed ones included
    pub assign_calls: usize,

    // agents dropped from this tick because an assignment failed
    pub dropped: BTreeSet<String>,
}

/*
 * For every requested resource pick the agent that should hold it. An agent
 * already holding a resource it still requests keeps it, otherwise a random
 * requester is chosen. Resources nobody requests get no entry.
 *
 * When a split left several agents claiming the same resource, the first
 * claimant (by uid) that still requests it stays.
 */
pub fn desired_assignments<R: Rng>(polled: &BTreeMap<String, api::CoordinationRecord>, rng: &mut R) -> DesiredAssignments {
    let mut requesters: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (uid, record) in polled {
	for resource in &record.requested {
	    requesters.entry(resource.as_str()).or_default().insert(uid.as_str());
	}
    }

    let mut desired = DesiredAssignments::new();
    for (resource, candidates) in requesters {
	let incumbent = polled.iter()
	    .find(|(uid, record)| record.holds(resource) && candidates.contains(uid.as_str()))
	    .map(|(uid, _)| uid.as_str());

	let holder = match incumbent {
	    Some(uid) => uid,
	    None => match candidates.iter().choose(rng) {
		Some(uid) => *uid,
		None => continue,
	    },
	};
	desired.insert(resource.to_string(), holder.to_string());
    }
    desired
}

pub fn resources_for(desired: &DesiredAssignments, uid: &str) -> BTreeSet<ResourceName> {
    desired.iter()
	.filter(|(_, holder)| holder.as_str() == uid)
	.map(|(resource, _)| resource.clone())
	.collect()
}

/*
 * AgentCoordinator hands out resources to agents. It only ever polls: every
 * tick it asks all known agents what they request and hold, computes who
 * should hold what and pushes the difference.
 *
 * It is idle while no agent is known and ticks at a fixed delay otherwise.
 * Agents that cannot be polled are left out of a tick; agents whose
 * assignment fails are dropped and the tick starts over without them until
 * a round goes through with no failure. Nothing that goes wrong in a tick
 * survives beyond a log line.
 */
pub struct AgentCoordinator<IO, R> {
    io: IO,
    rng: R,
    agents: BTreeMap<String, api::AgentRef>,
    interval: Duration,
    next_tick: Option<Instant>,
}

impl<IO, R> AgentCoordinator<IO, R>
where
    IO: PodCoordinationIo,
    R: Rng + Send,
{

    pub fn new(io: IO, rng: R, interval: Duration) -> Self {
	Self{
	    io: io,
	    rng: rng,
	    agents: BTreeMap::new(),
	    interval: interval,
	    next_tick: None,
	}
    }

    pub fn is_active(&self) -> bool {
	self.next_tick.is_some()
    }

    #[cfg(test)]
    pub fn agents(&self) -> impl Iterator<Item = &api::AgentRef> {
	self.agents.values()
    }

    pub fn handle(&mut self, event: AgentEvent) {
	match event {
	    AgentEvent::Added(agent) => self.on_agent_added(agent),
	    AgentEvent::Deleted(uid) => self.on_agent_deleted(&uid),
	}
    }

    pub fn on_agent_added(&mut self, agent: api::AgentRef) {
	log::info!("Pod {} added", agent.name);
	self.agents.insert(agent.uid.clone(), agent);

	if self.next_tick.is_none() {
	    log::debug!("Scheduling agent coordination every {:?}", self.interval);
	    self.next_tick = Some(Instant::now() + self.interval);
	}
    }

    pub fn on_agent_deleted(&mut self, uid: &str) {
	match self.agents.remove(uid) {
	    Some(agent) => log::info!("Pod {} deleted", agent.name),
	    None => log::debug!("Pod {} deleted, it was not known", uid),
	}

	if self.agents.is_empty() && self.next_tick.take().is_some() {
	    log::debug!("No agents left, agent coordination is idle");
	}
    }

    /*
     * One round of coordination over the agents known right now.
     */
    pub async fn tick(&mut self) -> TickOutcome {
	let mut working = self.agents.clone();
	let mut outcome = TickOutcome::default();

	while !working.is_empty() {
	    let polled = self.poll(&working).await;
	    if polled.is_empty() {
		log::debug!("No agent answered the coordination poll");
		break;
	    }

	    let desired = desired_assignments(&polled, &mut self.rng);
	    let failed = self.push(&working, &polled, &desired, &mut outcome).await;
	    if failed.is_empty() {
		outcome.leaders = desired;
		break;
	    }

	    for uid in failed {
		working.remove(&uid);
		outcome.dropped.insert(uid);
	    }
	}

	outcome
    }

    async fn poll(&self, working: &BTreeMap<String, api::AgentRef>) -> BTreeMap<String, api::CoordinationRecord> {
	let mut polled = BTreeMap::new();

	for (uid, agent) in working {
	    match self.io.poll(agent).await {
		Ok(record) => {
		    log::debug!("Polled {}: {:?}", agent.name, record);
		    polled.insert(uid.clone(), record);
		},
		Err(err) => {
		    log::debug!("Failed to poll for requested leaderships from {}: {}", agent.name, err);
		},
	    }
	}
	polled
    }

    /*
     * Pushes every assignment that differs from what the agent reported.
     * Returns the agents for which the push failed.
     */
    async fn push(
	&self,
	working: &BTreeMap<String, api::AgentRef>,
	polled: &BTreeMap<String, api::CoordinationRecord>,
	desired: &DesiredAssignments,
	outcome: &mut TickOutcome,
    ) -> BTreeSet<String> {
	let mut failed = BTreeSet::new();

	for (uid, record) in polled {
	    let agent = match working.get(uid) {
		Some(agent) => agent,
		None => continue,
	    };

	    let wanted = resources_for(desired, uid);
	    if wanted == record.assigned {
		continue;
	    }

	    outcome.assign_calls += 1;
	    match self.io.assign(agent, &wanted).await {
		Ok(()) => {
		    log::info!("Assigned leadership of {:?} to {}", wanted, agent.name);
		},
		Err(err) => {
		    log::warn!("Failed to assign leading resources to {}: {}", agent.name, err);
		    failed.insert(uid.clone());
		},
	    }
	}
	failed
    }

    /*
     * Drives the coordinator: membership changes from the agent pool and the
     * periodic tick, strictly one after the other. Returns when the agent
     * pool goes away.
     */
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<AgentEvent>) {
	log::info!("Agent coordinator started");

	loop {
	    let deadline = self.next_tick;

	    tokio::select! {
		event = inbox.recv() => match event {
		    Some(event) => self.handle(event),
		    None => {
			log::info!("Agent pool closed, stopping agent coordinator");
			return;
		    }
		},
		_ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
		    self.scheduled_tick().await;
		},
	    }
	}
    }

    async fn scheduled_tick(&mut self) {
	match AssertUnwindSafe(self.tick()).catch_unwind().await {
	    Ok(outcome) => {
		if !outcome.dropped.is_empty() {
		    log::info!("Agents {:?} could not be assigned and were skipped", outcome.dropped);
		}
		log::debug!("Agent coordination finished with {} assign calls, leaders {:?}", outcome.assign_calls, outcome.leaders);
	    },
	    Err(_) => {
		log::error!("Exception polling agents and assigning leaders");
	    },
	}

	if self.is_active() {
	    self.next_tick = Some(Instant::now() + self.interval);
	}
    }
}
