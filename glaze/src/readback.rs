//! Asynchronous framebuffer readback.
//!
//! Reads go through a small fixed ring of in-flight requests, each a pixel-pack buffer plus a
//! fence. Nothing here blocks on its own: the ring is polled with a zero timeout once per
//! frame, and requests still in flight at shutdown (or when the ring is exhausted) are
//! force-completed with a bounded wait. A request whose wait fails delivers `None` to its
//! callback instead of pixels; callbacks always fire exactly once.

use log::warn;

use crate::buffer::{BufferTarget, BufferUsage};
use crate::device::{Device, RawBuffer, RawFence};
use crate::state::{StateCache, with_buffer_bound};
use crate::texture::{PixelFormat, Pixmap};

pub(crate) const MAX_READ_REQUESTS: usize = 4;

/// Upper bound on a forced completion; a fence not signaling within this is treated as lost.
const FORCE_TIMEOUT_NS: u64 = 1_000_000_000;

type ReadCallback = Box<dyn FnOnce(Option<&Pixmap>)>;

struct ReadRequest {
  /// Reused across requests on this slot; created on first use, deleted at shutdown.
  pbo: Option<RawBuffer>,
  fence: Option<RawFence>,
  /// Whether the fence was created after the last submission flush, so the first wait on it
  /// should flush.
  flush_pending: bool,
  width: u32,
  height: u32,
  format: PixelFormat,
  callback: Option<ReadCallback>,
}

impl ReadRequest {
  fn idle() -> Self {
    ReadRequest {
      pbo: None,
      fence: None,
      flush_pending: false,
      width: 0,
      height: 0,
      format: PixelFormat::Rgba8,
      callback: None,
    }
  }

  fn in_flight(&self) -> bool {
    self.fence.is_some()
  }

  fn byte_len(&self) -> usize {
    self.width as usize * self.height as usize * self.format.pixel_size()
  }
}

/// The ring of in-flight readback requests.
pub(crate) struct ReadbackQueue {
  requests: Vec<ReadRequest>,
}

impl ReadbackQueue {
  pub fn new() -> Self {
    ReadbackQueue {
      requests: (0..MAX_READ_REQUESTS).map(|_| ReadRequest::idle()).collect(),
    }
  }

  /// A slot ready to take a new request. When every slot is in flight, slot 0 is forcibly
  /// completed and handed out; the caller keeps going at the cost of one bounded wait.
  pub fn claim_slot(
    &mut self,
    state: &mut StateCache,
    device: &mut dyn Device,
  ) -> usize {
    if let Some(slot) = self.requests.iter().position(|r| !r.in_flight()) {
      return slot;
    }

    warn!(
      "out of read requests ({}), forcing synchronization",
      self.requests.len()
    );
    self.force(0, state, device);
    0
  }

  /// The pack buffer of `slot`, creating it on first use.
  pub fn slot_pbo(&mut self, slot: usize, device: &mut dyn Device) -> RawBuffer {
    match self.requests[slot].pbo {
      Some(pbo) => pbo,
      None => {
        let pbo = device.create_buffer();
        self.requests[slot].pbo = Some(pbo);
        pbo
      }
    }
  }

  /// Record a request just submitted on `slot`.
  pub fn submit(
    &mut self,
    slot: usize,
    fence: RawFence,
    width: u32,
    height: u32,
    format: PixelFormat,
    callback: ReadCallback,
  ) {
    let request = &mut self.requests[slot];
    debug_assert!(!request.in_flight(), "submitting on a busy readback slot");

    request.fence = Some(fence);
    request.flush_pending = true;
    request.width = width;
    request.height = height;
    request.format = format;
    request.callback = Some(callback);
  }

  /// Zero-timeout pass over every in-flight request, completing the finished ones. Called
  /// once per frame.
  pub fn poll(&mut self, state: &mut StateCache, device: &mut dyn Device) {
    for slot in 0..self.requests.len() {
      if self.requests[slot].in_flight() {
        self.try_complete(slot, state, device, 0);
      }
    }
  }

  /// Complete `slot` now, waiting up to the bounded force timeout. Delivers `None` if the
  /// fence never signals.
  pub fn force(&mut self, slot: usize, state: &mut StateCache, device: &mut dyn Device) {
    if !self.requests[slot].in_flight() {
      return;
    }

    if !self.try_complete(slot, state, device, FORCE_TIMEOUT_NS) {
      warn!("read request on slot {} never completed", slot);

      let request = &mut self.requests[slot];
      if let Some(fence) = request.fence.take() {
        device.delete_fence(fence);
      }
      if let Some(callback) = request.callback.take() {
        callback(None);
      }
    }
  }

  /// Force-complete everything and release device objects. The queue is reusable afterwards
  /// but empty-handed.
  pub fn finalize(&mut self, state: &mut StateCache, device: &mut dyn Device) {
    for slot in 0..self.requests.len() {
      self.force(slot, state, device);

      if let Some(pbo) = self.requests[slot].pbo.take() {
        device.delete_buffer(pbo);
      }
    }
  }

  fn try_complete(
    &mut self,
    slot: usize,
    state: &mut StateCache,
    device: &mut dyn Device,
    timeout_ns: u64,
  ) -> bool {
    let request = &mut self.requests[slot];

    let fence = match request.fence {
      Some(fence) => fence,
      None => return true,
    };

    let flush = request.flush_pending;
    request.flush_pending = false;

    if !device.wait_fence(fence, flush, timeout_ns).is_signaled() {
      return false;
    }

    device.delete_fence(fence);
    request.fence = None;

    let callback = request.callback.take();
    let (width, height, format) = (request.width, request.height, request.format);
    let size = request.byte_len();
    let pbo = request.pbo;

    let pixels = pbo.and_then(|pbo| {
      let mut data = Vec::new();
      let ok = with_buffer_bound(state, device, BufferTarget::PixelPack, pbo, |device| {
        device.read_pack_buffer(size, &mut data)
      });

      ok.then(|| data)
    });

    if let Some(callback) = callback {
      match pixels {
        Some(data) => {
          let pixmap = Pixmap {
            width,
            height,
            format,
            data,
          };
          callback(Some(&pixmap));
        }
        None => callback(None),
      }
    }

    true
  }
}

/// Allocate pack-buffer storage sized for a `width` by `height` read.
pub(crate) fn prepare_pack_buffer(
  state: &mut StateCache,
  device: &mut dyn Device,
  pbo: RawBuffer,
  size: usize,
) {
  with_buffer_bound(state, device, BufferTarget::PixelPack, pbo, |device| {
    device.buffer_data(BufferTarget::PixelPack, size, None, BufferUsage::StreamRead);
  });
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use super::*;
  use crate::device::{FenceStatus, RecordingDevice};
  use crate::rect::Rect;

  fn harness() -> (ReadbackQueue, StateCache, RecordingDevice) {
    (
      ReadbackQueue::new(),
      StateCache::new(Rect::new(0., 0., 64., 64.)),
      RecordingDevice::new(),
    )
  }

  fn capture() -> (Rc<RefCell<Option<Option<(u32, u32, usize)>>>>, ReadCallback) {
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    let callback = Box::new(move |pixmap: Option<&Pixmap>| {
      *sink.borrow_mut() = Some(pixmap.map(|p| (p.width, p.height, p.data.len())));
    });

    (seen, callback)
  }

  #[test]
  fn poll_completes_signaled_requests() {
    let (mut queue, mut state, mut device) = harness();
    let (seen, callback) = capture();

    let slot = queue.claim_slot(&mut state, &mut device);
    let pbo = queue.slot_pbo(slot, &mut device);
    prepare_pack_buffer(&mut state, &mut device, pbo, 16 * 8 * 4);
    let fence = device.create_fence();
    queue.submit(slot, fence, 16, 8, PixelFormat::Rgba8, callback);

    queue.poll(&mut state, &mut device);

    assert_eq!(*seen.borrow(), Some(Some((16, 8, 16 * 8 * 4))));
  }

  #[test]
  fn unsignaled_requests_stay_in_flight() {
    let (mut queue, mut state, mut device) = harness();
    device.fence_status = FenceStatus::TimedOut;
    let (seen, callback) = capture();

    let slot = queue.claim_slot(&mut state, &mut device);
    let fence = device.create_fence();
    queue.submit(slot, fence, 4, 4, PixelFormat::R8, callback);

    queue.poll(&mut state, &mut device);
    assert_eq!(*seen.borrow(), None);
    assert!(queue.requests[slot].in_flight());

    // The first wait flushes, later ones must not.
    let log = device.log_handle();
    let waits: Vec<_> = log
      .borrow()
      .iter()
      .filter(|l| l.starts_with("wait_fence"))
      .cloned()
      .collect();
    assert_eq!(waits, [format!("wait_fence {} flush=true timeout=0", fence.0)]);

    queue.poll(&mut state, &mut device);
    let waits = log
      .borrow()
      .iter()
      .filter(|l| l.starts_with("wait_fence"))
      .count();
    assert_eq!(waits, 2);
    assert!(log
      .borrow()
      .last()
      .unwrap()
      .ends_with("flush=false timeout=0"));
  }

  #[test]
  fn forcing_a_dead_fence_delivers_none() {
    let (mut queue, mut state, mut device) = harness();
    device.fence_status = FenceStatus::TimedOut;
    let (seen, callback) = capture();

    let fence = device.create_fence();
    queue.submit(0, fence, 4, 4, PixelFormat::R8, callback);

    queue.force(0, &mut state, &mut device);

    assert_eq!(*seen.borrow(), Some(None));
    assert!(!queue.requests[0].in_flight());
  }

  #[test]
  fn claiming_past_capacity_forces_the_first_slot() {
    let (mut queue, mut state, mut device) = harness();
    device.fence_status = FenceStatus::TimedOut;

    let mut captures = Vec::new();
    for _ in 0..MAX_READ_REQUESTS {
      let (seen, callback) = capture();
      let slot = queue.claim_slot(&mut state, &mut device);
      let fence = device.create_fence();
      queue.submit(slot, fence, 2, 2, PixelFormat::R8, callback);
      captures.push(seen);
    }

    let slot = queue.claim_slot(&mut state, &mut device);

    assert_eq!(slot, 0);
    assert!(!queue.requests[0].in_flight());
    assert_eq!(*captures[0].borrow(), Some(None));
    assert_eq!(*captures[1].borrow(), None);
  }

  #[test]
  fn finalize_releases_fences_and_buffers() {
    let (mut queue, mut state, mut device) = harness();
    let (seen, callback) = capture();

    let slot = queue.claim_slot(&mut state, &mut device);
    let pbo = queue.slot_pbo(slot, &mut device);
    prepare_pack_buffer(&mut state, &mut device, pbo, 4);
    let fence = device.create_fence();
    queue.submit(slot, fence, 1, 1, PixelFormat::Rgba8, callback);

    queue.finalize(&mut state, &mut device);

    assert!(seen.borrow().is_some());

    let log = device.log_handle();
    let log = log.borrow();
    assert!(log.iter().any(|l| l == &format!("delete_fence {}", fence.0)));
    assert!(log.iter().any(|l| l == &format!("delete_buffer {}", pbo.0)));
  }
}
