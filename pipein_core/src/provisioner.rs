use crate::binding;
use crate::channel::{ByteChannel, FALLBACK_PIPE_CAPACITY, SetupError};
use crate::config::{BindingMode, OversizePolicy};
use std::io::{ErrorKind, PipeReader};
use std::mem::ManuallyDrop;
use std::os::fd::RawFd;
use tracing::{debug, warn};

/// Where the provisioner is in its per-iteration cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionerState {
    Idle,
    Prepared,
    Invoking,
}

/// What `prepare` set up for the current iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedInput {
    pub requested: usize,
    pub delivered: usize,
    pub read_fd: RawFd,
    pub write_fd: RawFd,
    pub stdin_bound: bool,
}

impl PreparedInput {
    /// The pipe accepted only a prefix of the buffer.
    pub fn is_truncated(&self) -> bool {
        self.delivered < self.requested
    }
}

#[derive(Debug)]
struct ActiveChannel {
    channel: ByteChannel,
    prepared: PreparedInput,
}

/// Owns the input channel of the iteration in flight and its binding onto
/// standard input.
#[derive(Debug)]
pub struct ChannelProvisioner {
    binding: BindingMode,
    oversize: OversizePolicy,
    state: ProvisionerState,
    active: Option<ActiveChannel>,
}

impl ChannelProvisioner {
    pub fn new(binding: BindingMode, oversize: OversizePolicy) -> Self {
        Self {
            binding,
            oversize,
            state: ProvisionerState::Idle,
            active: None,
        }
    }

    pub fn binding(&self) -> BindingMode {
        self.binding
    }

    pub fn state(&self) -> ProvisionerState {
        self.state
    }

    pub fn prepared(&self) -> Option<PreparedInput> {
        self.active.as_ref().map(|a| a.prepared)
    }

    /// Builds the channel for `data` and, in rebind mode, binds it onto
    /// standard input.
    ///
    /// On error nothing is left allocated and the provisioner stays `Idle`,
    /// except for [`SetupError::AlreadyPrepared`], which leaves the current
    /// iteration untouched.
    pub fn prepare(&mut self, data: &[u8]) -> Result<PreparedInput, SetupError> {
        let active = self.open_active(data)?;
        let prepared = active.prepared;
        self.active = Some(active);
        self.state = ProvisionerState::Prepared;
        Ok(prepared)
    }

    fn open_active(&self, data: &[u8]) -> Result<ActiveChannel, SetupError> {
        if self.state != ProvisionerState::Idle {
            return Err(SetupError::AlreadyPrepared);
        }

        let mut channel = ByteChannel::open()?;

        if self.oversize == OversizePolicy::Grow {
            grow_for(&mut channel, data.len());
        }

        let delivered = match channel.fill(data) {
            Ok(n) => n,
            Err(e) => {
                channel.release();
                return Err(e);
            }
        };

        if delivered < data.len() {
            if self.oversize == OversizePolicy::Reject {
                channel.release();
                return Err(SetupError::InputTooLarge {
                    requested: data.len(),
                    capacity: delivered,
                });
            }
            warn!(
                requested = data.len(),
                delivered, "input truncated to pipe capacity"
            );
        }

        if let Err(e) = channel.set_read_nonblocking() {
            channel.release();
            return Err(e);
        }

        let stdin_bound = match self.binding {
            BindingMode::Rebind => {
                if let Err(e) = binding::bind_stdin(channel.read_fd()) {
                    channel.release();
                    return Err(e);
                }
                true
            }
            BindingMode::Threaded => false,
        };

        let prepared = PreparedInput {
            requested: data.len(),
            delivered,
            read_fd: channel.read_fd(),
            write_fd: channel.write_fd(),
            stdin_bound,
        };
        debug!(?prepared, "iteration input prepared");

        Ok(ActiveChannel { channel, prepared })
    }

    /// Moves a prepared iteration into `Invoking` and lends out the read end.
    pub fn begin_invocation(&mut self) -> Option<&mut PipeReader> {
        if self.state == ProvisionerState::Idle {
            return None;
        }
        self.state = ProvisionerState::Invoking;
        self.active.as_mut().map(|a| a.channel.reader())
    }

    /// Releases both channel ends and the standard input binding.
    ///
    /// Safe to call from any state; from `Idle` it does nothing.
    pub fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            release_active(active);
        }
        self.state = ProvisionerState::Idle;
    }

    /// Prepares an iteration whose teardown runs when the returned guard is
    /// dropped, on every exit path including unwinding.
    ///
    /// The guard owns the channel for its whole lifetime.
    pub fn scoped(&mut self, data: &[u8]) -> Result<Iteration<'_>, SetupError> {
        let active = self.open_active(data)?;
        self.state = ProvisionerState::Prepared;
        Ok(Iteration {
            provisioner: self,
            active: ManuallyDrop::new(active),
        })
    }
}

impl Drop for ChannelProvisioner {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn release_active(active: ActiveChannel) {
    active.channel.release();
    if active.prepared.stdin_bound {
        binding::release_stdin();
    }
    debug!(read_fd = active.prepared.read_fd, "iteration torn down");
}

/// Whether a pipe of `capacity` must be enlarged to take `wanted` bytes.
/// An unknown capacity is assumed to be the portable default.
fn needs_growth(capacity: Option<usize>, wanted: usize) -> bool {
    wanted > capacity.unwrap_or(FALLBACK_PIPE_CAPACITY)
}

fn grow_for(channel: &mut ByteChannel, wanted: usize) {
    if !needs_growth(channel.capacity(), wanted) {
        return;
    }
    match channel.grow_to(wanted) {
        Ok(capacity) if capacity < wanted => {
            debug!(wanted, capacity, "pipe grown but still smaller than input");
        }
        Ok(_) => {}
        Err(error) if error.kind() == ErrorKind::Unsupported => {
            debug!(wanted, "pipe capacity is fixed on this platform");
        }
        Err(error) => {
            warn!(wanted, %error, "could not grow pipe, input may be truncated");
        }
    }
}

/// A prepared iteration. Dropping it tears the channel down.
///
/// While the guard lives the provisioner reports `Prepared` or `Invoking`
/// and refuses further `prepare` calls.
#[derive(Debug)]
pub struct Iteration<'a> {
    provisioner: &'a mut ChannelProvisioner,
    active: ManuallyDrop<ActiveChannel>,
}

impl Iteration<'_> {
    pub fn prepared(&self) -> PreparedInput {
        self.active.prepared
    }

    pub fn state(&self) -> ProvisionerState {
        self.provisioner.state()
    }

    /// Runs `f` with the read end as the explicit standard input.
    pub fn invoke<R>(&mut self, f: impl FnOnce(&mut PipeReader) -> R) -> R {
        self.provisioner.state = ProvisionerState::Invoking;
        f(self.active.channel.reader())
    }
}

impl Drop for Iteration<'_> {
    fn drop(&mut self) {
        // SAFETY: `active` is never touched again after this.
        let active = unsafe { ManuallyDrop::take(&mut self.active) };
        release_active(active);
        self.provisioner.state = ProvisionerState::Idle;
    }
}
