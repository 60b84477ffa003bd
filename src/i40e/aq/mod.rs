//! Admin Queue: firmware commands over a send ring, firmware events over a receive ring.
//!
//! Every command gets a session whose handle doubles as the descriptor cookie. Draining a
//! ring matches written-back cookies to sessions; receive descriptors that match nothing
//! are firmware events and are queued until [`AdminQueue::take_events`].

pub mod commands;
mod descriptor;
mod ring;
mod session;

use std::collections::VecDeque;
use std::time::Duration;

use zerocopy::AsBytes;

use crate::env::Environment;
use crate::error::{Error, Result};
use crate::i40e::driver_constants::{AQ_BUFFER_SIZE, AQ_COMMAND_TIMEOUT, AQ_POLL_INTERVAL, AQ_RING_SIZE};
use crate::i40e::regs::RegisterFile;

pub use descriptor::{AqDescriptor, AqStatus, DescFlags, Le16, Le32, Opcode};
pub use ring::{AqRing, Payload, Role};
pub use session::{Completion, SessionHandle, SessionResult, Sessions};

#[derive(Clone, Copy, Debug)]
pub struct AqConfig {
    pub num_asq_entries: u16,
    pub num_arq_entries: u16,
    pub asq_buf_size: u16,
    pub arq_buf_size: u16,
    pub command_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for AqConfig {
    fn default() -> Self {
        AqConfig {
            num_asq_entries: AQ_RING_SIZE,
            num_arq_entries: AQ_RING_SIZE,
            asq_buf_size: AQ_BUFFER_SIZE,
            arq_buf_size: AQ_BUFFER_SIZE,
            command_timeout: AQ_COMMAND_TIMEOUT,
            poll_interval: AQ_POLL_INTERVAL,
        }
    }
}

pub struct AdminQueue<'a, E: Environment, R: RegisterFile> {
    env: &'a E,
    bar: &'a R,
    config: AqConfig,
    asq: AqRing,
    arq: AqRing,
    sessions: Sessions,
    events: VecDeque<Completion>,
}

impl<'a, E: Environment, R: RegisterFile> AdminQueue<'a, E, R> {
    pub fn init(env: &'a E, bar: &'a R, config: AqConfig) -> Result<AdminQueue<'a, E, R>> {
        let asq = AqRing::init(env, bar, Role::Send, config.num_asq_entries, config.asq_buf_size)?;
        let mut arq = match AqRing::init(env, bar, Role::Receive, config.num_arq_entries, config.arq_buf_size) {
            Ok(arq) => arq,
            Err(e) => {
                asq.shutdown(env, bar);
                return Err(e);
            }
        };
        arq.refill_receive(bar);

        info!("Admin queue up: {} send / {} receive descriptors", config.num_asq_entries, config.num_arq_entries);
        Ok(AdminQueue { env, bar, config, asq, arq, sessions: Sessions::new(), events: VecDeque::new() })
    }

    /// Tells firmware the driver is leaving, then releases both rings.
    ///
    /// The shutdown command is best effort: firmware that does not answer still gets its
    /// rings disabled.
    pub fn shutdown(mut self) {
        if let Err(e) = self.queue_shutdown(true) {
            warn!("Queue shutdown command failed: {}", e);
        }
        self.release();
    }

    /// Releases both rings without talking to firmware.
    pub fn release(self) {
        if !self.sessions.is_empty() {
            debug!("Releasing admin queue with {} live sessions", self.sessions.len());
        }
        self.arq.shutdown(self.env, self.bar);
        self.asq.shutdown(self.env, self.bar);
    }

    pub fn config(&self) -> &AqConfig {
        &self.config
    }

    pub fn env(&self) -> &'a E {
        self.env
    }

    pub fn bar(&self) -> &'a R {
        self.bar
    }

    pub fn ring(&self, role: Role) -> &AqRing {
        match role {
            Role::Send => &self.asq,
            Role::Receive => &self.arq,
        }
    }

    pub fn unused_count(&self, role: Role) -> u16 {
        self.ring(role).unused_count()
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn create_session(&mut self) -> Result<SessionHandle> {
        self.sessions.create()
    }

    pub fn delete_session(&mut self, handle: SessionHandle) -> bool {
        self.sessions.delete(handle)
    }

    /// Queues one command on the send ring on behalf of `handle`.
    pub fn submit(&mut self, handle: SessionHandle, opcode: Opcode, params: &[u8; 16], payload: Payload<'_>) -> Result<()> {
        self.asq.submit(self.bar, opcode.code(), DescFlags::empty(), params, payload, handle.cookie())?;
        self.sessions.mark_submitted(handle.cookie(), opcode);
        Ok(())
    }

    /// Processes everything hardware has finished on one ring. Returns the number of
    /// descriptors processed.
    pub fn drain(&mut self, role: Role) -> u16 {
        let AdminQueue { bar, asq, arq, sessions, events, .. } = self;
        let ring = match role {
            Role::Send => asq,
            Role::Receive => arq,
        };

        let cleaned = ring.clean(*bar, |desc, data| {
            let cookie = desc.cookie();
            let result = completion_for(desc, data);
            if sessions.contains(cookie) {
                sessions.complete(cookie, result);
                return;
            }
            match (role, result) {
                (Role::Receive, Ok(event)) => {
                    debug!("Firmware event {:?}", event.opcode);
                    events.push_back(event);
                }
                (Role::Receive, Err(e)) => warn!("Dropping firmware event: {}", e),
                (Role::Send, _) => warn!("Completion for opcode {:#06x} carries stale cookie {:#x}", desc.opcode.get(), cookie),
            }
        });

        if role == Role::Receive {
            ring.refill_receive(*bar);
        }
        cleaned
    }

    /// Polls the send ring until `handle` completes or the command timeout expires.
    pub fn wait(&mut self, handle: SessionHandle) -> Result<Completion> {
        let opcode = self.sessions.opcode(handle).map(Opcode::code).unwrap_or(0);
        let mut waited = Duration::ZERO;
        loop {
            self.drain(Role::Send);
            if let Some(result) = self.sessions.take_result(handle) {
                return result;
            }
            if waited >= self.config.command_timeout {
                warn!("Admin command {:#06x} timed out after {:?}", opcode, waited);
                return Err(Error::CommandTimeout { opcode });
            }
            self.env.sleep(self.config.poll_interval);
            waited += self.config.poll_interval;
        }
    }

    /// Creates a session and submits a command for it. The session is gone again if
    /// submission fails.
    pub fn start<P: AsBytes>(&mut self, opcode: Opcode, params: &P, payload: Payload<'_>) -> Result<SessionHandle> {
        let handle = self.create_session()?;
        if let Err(e) = self.submit(handle, opcode, &pack_params(params), payload) {
            self.delete_session(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Waits for a started command, then deletes its session whatever the outcome.
    pub fn finish(&mut self, handle: SessionHandle) -> Result<Completion> {
        let result = self.wait(handle);
        self.delete_session(handle);
        result
    }

    pub fn execute<P: AsBytes>(&mut self, opcode: Opcode, params: &P, payload: Payload<'_>) -> Result<Completion> {
        let handle = self.start(opcode, params, payload)?;
        self.finish(handle)
    }

    pub fn take_events(&mut self) -> Vec<Completion> {
        self.events.drain(..).collect()
    }
}

fn completion_for(desc: &AqDescriptor, data: &[u8]) -> Result<Completion> {
    let code = desc.opcode.get();
    let opcode = Opcode::try_from(code).map_err(Error::UnknownOpcode)?;
    let status = AqStatus(desc.retval.get());
    if !status.is_ok() {
        return Err(Error::CommandStatus { opcode: code, status });
    }
    Ok(Completion::new(opcode, *desc, data.to_vec()))
}

fn pack_params<P: AsBytes>(params: &P) -> [u8; 16] {
    let mut packed = [0; 16];
    let bytes = params.as_bytes();
    let len = bytes.len().min(packed.len());
    packed[..len].copy_from_slice(&bytes[..len]);
    packed
}
