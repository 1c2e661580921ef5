//! Link profiles with per-technology presets
//!
//! This module provides LinkProfile which models the capacity and latency of
//! one link technology (data rate, propagation delay, MTU), with presets
//! matching common backhaul, LAN, wireless and cellular deployments.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity and latency parameters of one link technology
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkProfile {
    /// Data rate in bits per second
    pub data_rate_bps: u64,
    /// One-way propagation delay in nanoseconds
    pub delay_ns: u64,
    /// Maximum transmission unit (bytes)
    pub mtu: u16,
}

impl LinkProfile {
    pub fn new(data_rate_bps: u64, delay: Duration, mtu: u16) -> Self {
        Self {
            data_rate_bps,
            delay_ns: delay.as_nanos() as u64,
            mtu,
        }
    }

    /// Propagation delay as a `Duration`
    pub fn delay(&self) -> Duration {
        Duration::from_nanos(self.delay_ns)
    }

    /// Point-to-point access link
    pub fn point_to_point() -> Self {
        Self {
            data_rate_bps: 5_000_000, // 5 Mbps
            delay_ns: 2_000_000,      // 2 ms
            mtu: 1500,
        }
    }

    /// Internet backhaul between the packet gateway and a remote host
    pub fn internet_backhaul() -> Self {
        Self {
            data_rate_bps: 100_000_000_000, // 100 Gb/s
            delay_ns: 10_000_000,           // 10 ms
            mtu: 1500,
        }
    }

    /// Shared-media LAN segment
    pub fn shared_media() -> Self {
        Self {
            data_rate_bps: 100_000_000, // 100 Mbps
            delay_ns: 6_560,
            mtu: 1500,
        }
    }

    /// Infrastructure wireless LAN
    pub fn wireless_lan() -> Self {
        Self {
            data_rate_bps: 54_000_000,
            delay_ns: 1_000,
            mtu: 1500,
        }
    }

    /// Vehicular wireless (OFDM 6 Mbps on a 10 MHz channel)
    pub fn vehicular() -> Self {
        Self {
            data_rate_bps: 6_000_000,
            delay_ns: 1_000,
            mtu: 1500,
        }
    }

    /// Cellular radio access, single component carrier
    pub fn cellular_access() -> Self {
        Self {
            data_rate_bps: 25_000_000, // 25 Mbps per carrier
            delay_ns: 1_000_000,       // one TTI
            mtu: 1500,
        }
    }

    /// Base station to packet gateway backhaul
    pub fn core_backhaul() -> Self {
        Self {
            data_rate_bps: 10_000_000_000, // 10 Gb/s
            delay_ns: 0,
            mtu: 2000,
        }
    }

    /// Multiply the data rate, used for carrier aggregation
    pub fn with_rate_factor(mut self, factor: u64) -> Self {
        self.data_rate_bps = self.data_rate_bps.saturating_mul(factor.max(1));
        self
    }

    /// Time to serialize `bytes` onto the link, in nanoseconds
    pub fn serialization_ns(&self, bytes: u32) -> u64 {
        if self.data_rate_bps == 0 {
            return 0;
        }
        ((bytes as u128 * 8 * 1_000_000_000) / self.data_rate_bps as u128) as u64
    }
}
