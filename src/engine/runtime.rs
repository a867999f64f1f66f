//! Expression tracking runtime
//!
//! Orchestrates per-zone inference sessions: frames are resampled into each
//! zone's input tensor, dispatched asynchronously, and published through
//! double-buffered outputs. Consumers read the committed halves atomically,
//! either by locking zones or from inside the data-ready callback.

use std::sync::Arc;

use ndarray::Array4;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{error, warn};

use super::executor::{Executor, InferSession, OrtExecutor, RunCallback};
use super::preprocess::ImageFrame;
use crate::config::Config;
use crate::params::{self, Param, PARAM_COUNT};
use crate::utils::math;
use crate::zones::{Timestamp, Zone, Zones, TIMESTAMP_INVALID};

/// Model input spatial bounds accepted by [`Runtime::load_model`].
const INPUT_SIZE_MIN: i64 = 8;
const INPUT_SIZE_MAX: i64 = 4096;

type DataCallback = Box<dyn FnMut(&DataView<'_>, Zones, Timestamp) + Send>;

/// Per-zone session resources.
///
/// `output[swap]` is the committed half readable by consumers; its partner
/// is written by the next inference. The session handle may be shared with
/// the other eye zone; dropping the last handle releases the session.
struct ZoneContext {
    session: Option<Arc<dyn InferSession>>,
    /// Width, height of the model input.
    input_size: [usize; 2],
    input: Array4<f32>,
    output: [Array4<f32>; 2],
    timestamp: [Timestamp; 2],
    /// Zones submitted together with this one in the enclosing frame.
    group: Zones,
    swap: bool,
}

impl ZoneContext {
    fn empty() -> Self {
        Self {
            session: None,
            input_size: [0, 0],
            input: Array4::zeros((1, 1, 0, 0)),
            output: [Array4::zeros((1, 1, 1, 0)), Array4::zeros((1, 1, 1, 0))],
            timestamp: [TIMESTAMP_INVALID; 2],
            group: Zones::NONE,
            swap: false,
        }
    }

    fn committed_output(&self) -> &Array4<f32> {
        &self.output[self.swap as usize]
    }

    fn committed_timestamp(&self) -> Timestamp {
        self.timestamp[self.swap as usize]
    }
}

struct State {
    contexts: [ZoneContext; Zone::COUNT],
    /// Zones whose inference is in flight.
    pending: Zones,
    /// Zones whose completed result awaits a deferred swap (consumer-locked).
    pending_swap: Zones,
    /// Zones the consumer currently holds.
    locked: Zones,
    on_data: Option<DataCallback>,
}

struct Shared {
    state: Mutex<State>,
    process_finished: Condvar,
    swap_finished: Condvar,
}

impl Shared {
    /// Blocks until no zone in `zones` has inference in flight; with `swap`,
    /// additionally until none has a deferred swap outstanding.
    fn wait_zones(&self, state: &mut MutexGuard<'_, State>, zones: Zones, swap: bool) {
        while state.pending.intersects(zones) {
            self.process_finished.wait(state);
        }
        if !swap {
            return;
        }
        while state.pending_swap.intersects(zones) {
            self.swap_finished.wait(state);
        }
    }

    /// Per-zone inference completion, called from an executor thread.
    fn on_process(&self, zone: Zone, result: anyhow::Result<Array4<f32>>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let context = &mut state.contexts[zone.index()];
        let group = context.group;
        state.pending.remove(zone);
        match result {
            Ok(output) => context.output[!context.swap as usize] = output,
            // Buffer management is status-agnostic: the unread half keeps its
            // previous contents and is committed with the new timestamp.
            Err(err) => error!("inference failed for zone '{zone}': {err:#}"),
        }
        if state.locked.contains(zone) {
            state.pending_swap.insert(zone);
        } else {
            context.swap = !context.swap;
        }
        let timestamp = context.timestamp[context.swap as usize];
        if let Some(mut on_data) = state.on_data.take() {
            // The callback contract promises data stays locked for its
            // duration: the mutex is held and the view reads in place.
            let view = DataView { state: &*state };
            on_data(&view, group, timestamp);
            state.on_data = Some(on_data);
        }
        self.process_finished.notify_all();
    }
}

/// Inference runtime for a single tracker instance.
///
/// Thread-safe at its public surface; spawns no threads of its own. All
/// inference runs on executor-owned workers. Dropping the runtime blocks
/// until in-flight inference drains, then releases every session.
pub struct Runtime {
    shared: Arc<Shared>,
    executor: Arc<dyn Executor>,
}

impl Runtime {
    /// Create a runtime on top of an explicit executor.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    contexts: [ZoneContext::empty(), ZoneContext::empty(), ZoneContext::empty()],
                    pending: Zones::NONE,
                    pending_swap: Zones::NONE,
                    locked: Zones::NONE,
                    on_data: None,
                }),
                process_finished: Condvar::new(),
                swap_finished: Condvar::new(),
            }),
            executor,
        }
    }

    /// Create a runtime backed by the default ONNX Runtime executor.
    pub fn init(config: &Config) -> Self {
        Self::new(Arc::new(OrtExecutor::new(config.inference.clone())))
    }

    /// Load a model for `zones` from a serialized byte slice.
    ///
    /// `zones` must name a single zone, or exactly both eyes for a shared eye
    /// model. Blocks while any named zone has inference in flight. Returns
    /// `false` on any validation or executor failure, leaving prior state
    /// intact. Replacing a loaded zone releases the previous session once no
    /// other zone references it.
    pub fn load_model(&self, model: &[u8], zones: Zones) -> bool {
        let Some(first) = zones.iter().next() else {
            warn!("no zones requested");
            return false;
        };
        if zones.len() > 1 && zones != Zones::BOTH_EYES {
            warn!("invalid zone combination '{zones}'");
            return false;
        }
        let mut state = self.shared.state.lock();
        self.shared.wait_zones(&mut state, zones, false);
        let session = match self.executor.load(model) {
            Ok(session) => session,
            Err(err) => {
                error!("model load failed: {err:#}");
                return false;
            }
        };
        let input_shape = session.input_shape();
        let valid_axis = |axis: i64| (INPUT_SIZE_MIN..=INPUT_SIZE_MAX).contains(&axis);
        if input_shape[0] != 1 || input_shape[1] != 1 || !valid_axis(input_shape[2]) || !valid_axis(input_shape[3]) {
            error!("input shape out of range {input_shape:?}");
            return false;
        }
        let output_len = params::zone_output_len(first) as i64;
        let output_shape = session.output_shape();
        if output_shape != [1, 1, 1, output_len] {
            error!("wrong output shape {output_shape:?}, expected [1, 1, 1, {output_len}]");
            return false;
        }
        let (height, width) = (input_shape[2] as usize, input_shape[3] as usize);
        for zone in zones.iter() {
            let context = &mut state.contexts[zone.index()];
            *context = ZoneContext::empty();
            context.session = Some(Arc::clone(&session));
            context.input_size = [width, height];
            context.input = Array4::zeros((1, 1, height, width));
            context.output = [
                Array4::zeros((1, 1, 1, output_len as usize)),
                Array4::zeros((1, 1, 1, output_len as usize)),
            ];
        }
        true
    }

    /// Submit one frame of zone-tagged images for inference.
    ///
    /// Returns the mask of zones actually dispatched, or the empty mask when
    /// validation or resampling fails (no partial dispatch). Blocks while any
    /// addressed zone still has uncommitted work from the previous frame.
    pub fn push_frame(&self, images: &[ImageFrame<'_>], timestamp: Timestamp) -> Zones {
        let mut guard = self.shared.state.lock();
        let mut group = Zones::NONE;
        for image in images {
            if group.contains(image.zone) {
                warn!("cannot push multiple images for zone '{}'", image.zone);
                return Zones::NONE;
            }
            if guard.contexts[image.zone.index()].session.is_none() {
                warn!("no model loaded for zone '{}'", image.zone);
                return Zones::NONE;
            }
            group.insert(image.zone);
        }
        self.shared.wait_zones(&mut guard, group, true);
        let state = &mut *guard;
        for image in images {
            let context = &mut state.contexts[image.zone.index()];
            let [width, height] = context.input_size;
            let buffer = context.input.as_slice_mut().unwrap();
            if !image.resample_to(buffer, width as u32, height as u32) {
                warn!("failed to resample image for zone '{}'", image.zone);
                return Zones::NONE;
            }
        }
        for image in images {
            let zone = image.zone;
            let context = &mut state.contexts[zone.index()];
            context.timestamp[!context.swap as usize] = timestamp;
            let Some(session) = context.session.as_ref() else {
                continue;
            };
            let shared = Arc::clone(&self.shared);
            let done: RunCallback = Box::new(move |result| shared.on_process(zone, result));
            if let Err(err) = session.run_async(context.input.clone(), done) {
                error!("failed to queue inference for zone '{zone}': {err:#}");
                group.remove(zone);
            }
        }
        for zone in group.iter() {
            state.contexts[zone.index()].group = group;
        }
        state.pending |= group;
        group
    }

    /// Install or replace the data-ready callback.
    ///
    /// Invoked once per completing zone, from an executor thread, with the
    /// submission's zone-group mask and the zone's committed timestamp. The
    /// runtime mutex is held for the duration; read through the provided
    /// [`DataView`], never back through the runtime.
    pub fn on_data<F>(&self, callback: F)
    where
        F: FnMut(&DataView<'_>, Zones, Timestamp) + Send + 'static,
    {
        self.shared.state.lock().on_data = Some(Box::new(callback));
    }

    /// Remove the data-ready callback.
    pub fn clear_on_data(&self) {
        self.shared.state.lock().on_data = None;
    }

    /// Hold `zones` for the consumer: while held, their committed outputs and
    /// timestamps never change and reads run in constant time.
    ///
    /// The set is absolute, not additive; zones released here publish any
    /// swap deferred while they were held. With `wait`, blocks until no held
    /// zone has inference in flight.
    pub fn lock_zones(&self, zones: Zones, wait: bool) {
        let mut guard = self.shared.state.lock();
        if wait {
            self.shared.wait_zones(&mut guard, zones, false);
        }
        let state = &mut *guard;
        let swap = (state.locked & !zones) & state.pending_swap;
        state.locked = zones;
        for zone in swap.iter() {
            let context = &mut state.contexts[zone.index()];
            context.swap = !context.swap;
        }
        state.pending_swap &= !swap;
        if !swap.is_empty() {
            self.shared.swap_finished.notify_all();
        }
    }

    /// Copy committed parameter values starting at `first`.
    ///
    /// All-or-nothing: returns [`TIMESTAMP_INVALID`] without copying when any
    /// referenced zone has no loaded model; otherwise the latest timestamp
    /// common to every referenced zone.
    pub fn params(&self, first: Param, out: &mut [f32]) -> Timestamp {
        let state = self.shared.state.lock();
        read_params(&state, first, out)
    }

    /// Copy committed gaze vectors for both eyes: `[x, y, z, openness]` each.
    pub fn gazes(&self, out: &mut [[f32; 4]; 2]) -> Timestamp {
        let state = self.shared.state.lock();
        read_gazes(&state, out)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        self.shared.wait_zones(&mut state, Zones::ALL, false);
        let contexts: Vec<ZoneContext> = state
            .contexts
            .iter_mut()
            .map(|context| std::mem::replace(context, ZoneContext::empty()))
            .collect();
        drop(state);
        // Session teardown joins executor workers; keep the mutex released.
        drop(contexts);
    }
}

/// Read access to committed outputs while the runtime mutex is held.
///
/// Handed to the data-ready callback; reads are in place and never block.
pub struct DataView<'a> {
    state: &'a State,
}

impl DataView<'_> {
    /// See [`Runtime::params`].
    pub fn params(&self, first: Param, out: &mut [f32]) -> Timestamp {
        read_params(self.state, first, out)
    }

    /// See [`Runtime::gazes`].
    pub fn gazes(&self, out: &mut [[f32; 4]; 2]) -> Timestamp {
        read_gazes(self.state, out)
    }
}

fn read_params(state: &State, first: Param, out: &mut [f32]) -> Timestamp {
    let start = first.index();
    let count = out.len().min(PARAM_COUNT - start);
    if count == 0 {
        return TIMESTAMP_INVALID;
    }
    let mut zones = Zones::NONE;
    for zone in Zone::ALL {
        let base = params::zone_param_base(zone);
        if start < base + params::zone_param_len(zone) && base < start + count {
            zones.insert(zone);
        }
    }
    if zones.iter().any(|zone| state.contexts[zone.index()].session.is_none()) {
        return TIMESTAMP_INVALID;
    }
    let mut timestamp = Timestamp::MAX;
    for zone in zones.iter() {
        let context = &state.contexts[zone.index()];
        timestamp = timestamp.min(context.committed_timestamp());
        let mut values = [0.0f32; params::MOUTH_PARAM_COUNT];
        let len = params::zone_param_len(zone);
        zone_params(context, zone, &mut values[..len]);
        let base = params::zone_param_base(zone);
        let lo = base.max(start);
        let hi = (base + len).min(start + count);
        for index in lo..hi {
            out[index - start] = values[index - base];
        }
    }
    timestamp
}

/// Fills a zone's parameter slice from its committed output vector.
fn zone_params(context: &ZoneContext, zone: Zone, out: &mut [f32]) {
    let committed = context.committed_output();
    let raw = committed.as_slice().unwrap_or(&[]);
    match zone {
        Zone::Mouth => {
            // Mouth outputs map positionally onto the mouth parameter slice.
            for (dst, src) in out.iter_mut().zip(raw) {
                *dst = *src;
            }
        }
        Zone::LeftEye | Zone::RightEye => {
            let gaze_x = raw.first().copied().unwrap_or(0.0);
            let gaze_y = raw.get(1).copied().unwrap_or(0.0);
            let closed = raw.get(2).copied().unwrap_or(0.0);
            // "Out" is the temporal direction: -x for the left eye, +x for
            // the right.
            let (look_out, look_in) = if zone == Zone::LeftEye {
                (math::directional_weight(-gaze_x), math::directional_weight(gaze_x))
            } else {
                (math::directional_weight(gaze_x), math::directional_weight(-gaze_x))
            };
            out[0] = look_out;
            out[1] = look_in;
            out[2] = math::directional_weight(gaze_y);
            out[3] = math::directional_weight(-gaze_y);
            out[4] = closed.clamp(0.0, 1.0);
        }
    }
}

fn read_gazes(state: &State, out: &mut [[f32; 4]; 2]) -> Timestamp {
    let eyes = [Zone::LeftEye, Zone::RightEye];
    if eyes
        .iter()
        .any(|zone| state.contexts[zone.index()].session.is_none())
    {
        return TIMESTAMP_INVALID;
    }
    let mut timestamp = Timestamp::MAX;
    for (slot, zone) in eyes.into_iter().enumerate() {
        let context = &state.contexts[zone.index()];
        timestamp = timestamp.min(context.committed_timestamp());
        let raw = context.committed_output().as_slice().unwrap_or(&[]);
        let gaze_x = raw.first().copied().unwrap_or(0.0);
        let gaze_y = raw.get(1).copied().unwrap_or(0.0);
        let closed = raw.get(2).copied().unwrap_or(0.0);
        let normal = math::gaze_normal(gaze_x, gaze_y);
        out[slot] = [normal[0], normal[1], normal[2], 1.0 - closed.clamp(0.0, 1.0)];
    }
    timestamp
}
