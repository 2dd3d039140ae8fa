//! Compute device slots.
//!
//! One `Device` is one unit of exclusive compute capacity: a CUDA device
//! index, or the CPU pseudo-slot when no GPUs were configured. Free
//! devices circulate through a flume channel, which hands them to
//! waiting workers in request order, so a series never starves even when
//! the job limit exceeds the device count.

use std::fmt;

use colored::{ColoredString, Colorize};
use colourado::Color;

use crate::error::BatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Gpu(u32),
    Cpu,
}

impl Device {
    /// For pretty-printing the device label.
    /// Surrounds with brackets and colors it with a palette color.
    pub fn prettify(&self, color: Color) -> ColoredString {
        let r = (color.red * 256.0) as u8;
        let g = (color.green * 256.0) as u8;
        let b = (color.blue * 256.0) as u8;
        format!("[{}]", self).truecolor(r, g, b)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Device::Gpu(id) => write!(f, "gpu{}", id),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// A fixed set of devices handed out one holder at a time.
///
/// The channel is sized to the device count, so `release` never blocks,
/// and a device is either in the channel (free) or held by exactly one
/// worker (busy).
pub struct DevicePool {
    devices: Vec<Device>,
    free_tx: flume::Sender<Device>,
    free_rx: flume::Receiver<Device>,
}

impl DevicePool {
    /// Builds a pool from the configured GPU ids. An empty list degrades
    /// to a single CPU pseudo-slot, announced rather than silent; all
    /// work then serializes through it.
    pub fn new(gpus: &[u32]) -> Self {
        let devices: Vec<Device> = if gpus.is_empty() {
            eprintln!("[aretomo-batch] No GPUs configured; serializing through a single CPU slot.");
            vec![Device::Cpu]
        } else {
            gpus.iter().map(|&id| Device::Gpu(id)).collect()
        };
        let (free_tx, free_rx) = flume::bounded(devices.len());
        for device in &devices {
            free_tx.send(*device).expect("pool channel sized to device count");
        }
        Self {
            devices,
            free_tx,
            free_rx,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Blocks until a device is free and returns ownership of it.
    ///
    /// Waiters are served first-requested, first-served. A closed pool
    /// surfaces as an error so the scheduler can abort instead of hang.
    pub async fn acquire(&self) -> Result<Device, BatchError> {
        self.free_rx
            .recv_async()
            .await
            .map_err(|_| BatchError::DevicePoolClosed)
    }

    /// Returns a device to the free set.
    pub fn release(&self, device: Device) {
        let _ = self.free_tx.send(device);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_acquire_hands_out_devices_in_order() {
        let pool = DevicePool::new(&[0, 1]);
        assert_eq!(pool.acquire().await.unwrap(), Device::Gpu(0));
        assert_eq!(pool.acquire().await.unwrap(), Device::Gpu(1));
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_release() {
        let pool = DevicePool::new(&[7]);
        let held = pool.acquire().await.unwrap();
        assert_eq!(held, Device::Gpu(7));

        // Pool is drained; another acquire must not resolve yet.
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());

        pool.release(held);
        assert_eq!(pool.acquire().await.unwrap(), Device::Gpu(7));
    }

    #[tokio::test]
    async fn test_empty_gpu_list_degrades_to_cpu() {
        let pool = DevicePool::new(&[]);
        assert_eq!(pool.devices(), &[Device::Cpu]);
        assert_eq!(pool.acquire().await.unwrap(), Device::Cpu);
        // Only one slot: everything serializes.
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_at_most_one_holder_per_device() {
        let pool = DevicePool::new(&[0, 1]);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a, b);
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(Device::Gpu(3).to_string(), "gpu3");
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }
}
