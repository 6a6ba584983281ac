//! Reload state machine.
//!
//! Structural changes (resize, fullscreen switch, vsync toggle, a stale
//! surface) are never applied to live objects. The driving loop raises
//! triggers through a shared [`ReloadTriggers`] handle; once per iteration
//! [`ReloadMachine::run`] consumes all of them at once and rebuilds the
//! render target and its dependents in a fixed order:
//!
//! ```text
//! wait idle
//! on_destroy hooks -> destroy overlay -> destroy block -> destroy target
//! apply changes
//! create target -> create block -> create overlay -> on_create hooks
//! ```
//!
//! Triggers raised while a reload is running stay pending for the next
//! iteration. Any failure after teardown leaves the machine `Aborted`.

use std::cell::Cell;
use std::error::Error as StdError;
use std::rc::Rc;

use ash::vk;
use thiserror::Error;
use tracing::{debug, error, info, trace};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A single reason to reload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The window's drawable size changed.
    Resize,
    /// Windowed and fullscreen mode are to be swapped.
    ModeSwitch,
    /// Vsync is to be flipped.
    VsyncToggle,
    /// The presentation engine reported the target out of date.
    SurfaceInvalid,
}

/// A coalesced set of triggers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReloadRequest {
    pub resize: bool,
    pub mode_switch: bool,
    pub vsync_toggle: bool,
    pub surface_invalid: bool,
}

impl ReloadRequest {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn raise(&mut self, trigger: Trigger) {
        *self.flag(trigger) = true;
    }

    pub fn contains(&self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Resize => self.resize,
            Trigger::ModeSwitch => self.mode_switch,
            Trigger::VsyncToggle => self.vsync_toggle,
            Trigger::SurfaceInvalid => self.surface_invalid,
        }
    }

    /// Union of both requests.
    pub fn merge(self, other: ReloadRequest) -> ReloadRequest {
        ReloadRequest {
            resize: self.resize || other.resize,
            mode_switch: self.mode_switch || other.mode_switch,
            vsync_toggle: self.vsync_toggle || other.vsync_toggle,
            surface_invalid: self.surface_invalid || other.surface_invalid,
        }
    }

    fn flag(&mut self, trigger: Trigger) -> &mut bool {
        match trigger {
            Trigger::Resize => &mut self.resize,
            Trigger::ModeSwitch => &mut self.mode_switch,
            Trigger::VsyncToggle => &mut self.vsync_toggle,
            Trigger::SurfaceInvalid => &mut self.surface_invalid,
        }
    }
}

impl From<Trigger> for ReloadRequest {
    fn from(trigger: Trigger) -> Self {
        let mut request = ReloadRequest::default();
        request.raise(trigger);
        request
    }
}

/// Shared handle for raising triggers.
///
/// Cloned into input listeners and anything else that needs to ask for a
/// reload. Raising the same trigger twice before the next reload has no
/// additional effect.
#[derive(Clone, Debug, Default)]
pub struct ReloadTriggers(Rc<Cell<ReloadRequest>>);

impl ReloadTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, trigger: Trigger) {
        let mut request = self.0.get();
        request.raise(trigger);
        self.0.set(request);
    }

    pub fn pending(&self) -> ReloadRequest {
        self.0.get()
    }

    pub fn is_pending(&self) -> bool {
        !self.0.get().is_empty()
    }

    /// Consumes every pending trigger.
    pub fn take(&self) -> ReloadRequest {
        self.0.take()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadState {
    Active,
    Reloading,
    Aborted,
}

/// Result of one [`ReloadMachine::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing was pending.
    Idle,
    /// Triggers are pending but the surface has no area; retried later.
    Deferred,
    /// One reload pass ran for the coalesced request.
    Reloaded(ReloadRequest),
}

/// The step a reload failed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadStep {
    WaitIdle,
    ApplyChanges,
    CreateTarget,
    CreateBlock,
    CreateOverlay,
}

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Reload failed at {step:?}: {source}")]
    Step {
        step: ReloadStep,
        #[source]
        source: BoxError,
    },

    #[error("An on_create hook rejected the new target")]
    HookFailed,

    #[error("Reload machine is aborted")]
    Aborted,
}

/// The objects a reload tears down and rebuilds.
///
/// The host owns the render target, command block and overlay; the machine
/// only decides when each method runs.
pub trait ReloadHost {
    type Error: Into<BoxError>;

    /// Blocks until the GPU has finished all submitted work.
    fn wait_idle(&mut self) -> Result<(), Self::Error>;

    /// Current drawable extent of the window.
    fn surface_extent(&self) -> vk::Extent2D;

    fn destroy_overlay(&mut self);

    fn destroy_block(&mut self);

    fn destroy_target(&mut self);

    /// Applies configuration changes (vsync, fullscreen) for `request`.
    fn apply_changes(&mut self, request: ReloadRequest) -> Result<(), Self::Error>;

    fn create_target(&mut self) -> Result<(), Self::Error>;

    /// Creates the command block with the new target's frame count.
    fn create_block(&mut self) -> Result<(), Self::Error>;

    fn create_overlay(&mut self) -> Result<(), Self::Error>;
}

type CreateHook<H> = Box<dyn FnMut(&mut H) -> bool>;
type DestroyHook<H> = Box<dyn FnMut(&mut H)>;

pub struct ReloadMachine<H> {
    triggers: ReloadTriggers,
    state: ReloadState,
    reloads: u64,
    on_create: Vec<CreateHook<H>>,
    on_destroy: Vec<DestroyHook<H>>,
}

impl<H> Default for ReloadMachine<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ReloadMachine<H> {
    pub fn new() -> Self {
        Self {
            triggers: ReloadTriggers::new(),
            state: ReloadState::Active,
            reloads: 0,
            on_create: Vec::new(),
            on_destroy: Vec::new(),
        }
    }

    /// Handle for raising triggers.
    pub fn triggers(&self) -> ReloadTriggers {
        self.triggers.clone()
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    /// Number of completed reload passes.
    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    /// Registers a hook that runs after every creation. Returning false
    /// aborts.
    pub fn on_create(&mut self, hook: impl FnMut(&mut H) -> bool + 'static) {
        self.on_create.push(Box::new(hook));
    }

    /// Registers a hook that runs before every teardown.
    pub fn on_destroy(&mut self, hook: impl FnMut(&mut H) + 'static) {
        self.on_destroy.push(Box::new(hook));
    }
}

impl<H: ReloadHost> ReloadMachine<H> {
    /// Initial creation: target, block, overlay, then `on_create` hooks.
    ///
    /// Triggers raised before start are dropped.
    pub fn start(&mut self, host: &mut H) -> Result<(), ReloadError> {
        if self.state == ReloadState::Aborted {
            return Err(ReloadError::Aborted);
        }
        self.triggers.take();

        match self.build(host) {
            Ok(()) => {
                self.state = ReloadState::Active;
                Ok(())
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    /// Runs one reload pass if any trigger is pending.
    pub fn run(&mut self, host: &mut H) -> Result<ReloadOutcome, ReloadError> {
        if self.state == ReloadState::Aborted {
            return Err(ReloadError::Aborted);
        }

        let pending = self.triggers.pending();
        if pending.is_empty() {
            return Ok(ReloadOutcome::Idle);
        }

        let extent = host.surface_extent();
        if extent.width == 0 || extent.height == 0 {
            trace!(?pending, "Reload deferred until the surface has an extent");
            return Ok(ReloadOutcome::Deferred);
        }

        let request = self.triggers.take();
        info!(?request, width = extent.width, height = extent.height, "Reloading render target");
        self.state = ReloadState::Reloading;

        match self.cycle(host, request) {
            Ok(()) => {
                self.state = ReloadState::Active;
                self.reloads += 1;
                debug!(reloads = self.reloads, "Reload complete");
                Ok(ReloadOutcome::Reloaded(request))
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    /// Final teardown in reload order. Safe to call after an abort.
    pub fn shutdown(&mut self, host: &mut H) {
        if let Err(err) = wait_idle(host) {
            error!("Wait idle before shutdown failed: {err}");
        }
        self.teardown(host);
        self.triggers.take();
    }

    fn cycle(&mut self, host: &mut H, request: ReloadRequest) -> Result<(), ReloadError> {
        wait_idle(host)?;
        self.teardown(host);
        host.apply_changes(request)
            .map_err(|err| step_error(ReloadStep::ApplyChanges, err))?;
        self.build(host)
    }

    fn teardown(&mut self, host: &mut H) {
        for hook in &mut self.on_destroy {
            hook(host);
        }
        host.destroy_overlay();
        host.destroy_block();
        host.destroy_target();
    }

    fn build(&mut self, host: &mut H) -> Result<(), ReloadError> {
        host.create_target()
            .map_err(|err| step_error(ReloadStep::CreateTarget, err))?;
        host.create_block()
            .map_err(|err| step_error(ReloadStep::CreateBlock, err))?;
        host.create_overlay()
            .map_err(|err| step_error(ReloadStep::CreateOverlay, err))?;

        for hook in &mut self.on_create {
            if !hook(host) {
                return Err(ReloadError::HookFailed);
            }
        }
        Ok(())
    }

    fn abort(&mut self, err: ReloadError) -> ReloadError {
        error!("{err}");
        self.state = ReloadState::Aborted;
        err
    }
}

fn wait_idle<H: ReloadHost>(host: &mut H) -> Result<(), ReloadError> {
    host.wait_idle()
        .map_err(|err| step_error(ReloadStep::WaitIdle, err))
}

fn step_error(step: ReloadStep, source: impl Into<BoxError>) -> ReloadError {
    ReloadError::Step {
        step,
        source: source.into(),
    }
}
