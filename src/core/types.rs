/*!
 * Core Types
 * Common types shared across the tuning daemon
 */

use serde::{Deserialize, Serialize};

/// Client process ID
pub type Pid = u32;

/// Client thread ID
pub type Tid = u32;

/// Opaque request handle, unique for the lifetime of the process
pub type Handle = u64;

/// Packed resource code: type byte in bits 16..24, 16-bit id in bits 0..16
pub type ResCode = u32;

/// Pack a resource type byte and 16-bit id into a resource code
#[inline]
pub fn pack_res_code(rtype: u8, rid: u16) -> ResCode {
    ((rtype as u32) << 16) | rid as u32
}

/// Type byte of a packed resource code
#[inline]
pub fn res_type(code: ResCode) -> u8 {
    ((code >> 16) & 0xff) as u8
}

/// 16-bit id of a packed resource code
#[inline]
pub fn res_id(code: ResCode) -> u16 {
    (code & 0xffff) as u16
}

/// Composite signal key: 16-bit signal id in the high word, 32-bit sub-type low
#[inline]
pub fn signal_key(sig_id: u16, sig_type: u32) -> u64 {
    ((sig_id as u64) << 32) | sig_type as u64
}

/// Client access level, derived from the peer UID and frozen for the
/// client's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    System,
    ThirdParty,
}

/// Request priority tier. Arbitration scans tiers in declaration order,
/// so a lower discriminant outranks a higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    SystemHigh = 0,
    SystemLow = 1,
    ThirdPartyHigh = 2,
    ThirdPartyLow = 3,
}

impl PriorityTier {
    pub const COUNT: usize = 4;

    /// All tiers in arbitration order (most dominant first)
    pub const ALL: [PriorityTier; 4] = [
        PriorityTier::SystemHigh,
        PriorityTier::SystemLow,
        PriorityTier::ThirdPartyHigh,
        PriorityTier::ThirdPartyLow,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Resolve the tier from the client's access level and requested urgency
    pub fn resolve(permission: Permission, high: bool) -> Self {
        match (permission, high) {
            (Permission::System, true) => PriorityTier::SystemHigh,
            (Permission::System, false) => PriorityTier::SystemLow,
            (Permission::ThirdParty, true) => PriorityTier::ThirdPartyHigh,
            (Permission::ThirdParty, false) => PriorityTier::ThirdPartyLow,
        }
    }

    pub fn is_system(self) -> bool {
        matches!(self, PriorityTier::SystemHigh | PriorityTier::SystemLow)
    }
}

/// Scope a resource is tuned at: the minimal addressable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyScope {
    /// Per logical core
    Core,
    /// Per cluster
    Cluster,
    /// One value for the whole system
    Global,
    /// Per registered cgroup
    Cgroup,
}

/// Arbitration policy governing a resource's per-tier lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Latest request wins immediately
    Instant,
    /// List kept value-descending; the largest value wins
    HigherIsBetter,
    /// List kept value-ascending; the smallest value wins
    LowerIsBetter,
    /// First-in-first-out; the oldest surviving request wins
    LazyFifo,
}

/// Translation unit tag for display and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[default]
    None,
    Kb,
    Mb,
    Hz,
    Khz,
    Mhz,
    Ms,
    Percent,
}

/// One concrete resource mutation: the unit a request is made of after
/// signal fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTuple {
    pub res_code: ResCode,
    /// Scope qualifier: logical core index, cluster id, cgroup id, or 0
    /// for global resources
    pub res_info: i32,
    pub value: i32,
}

/// Activation mode bits: a resource may only be provisioned while the
/// device is in one of its declared modes.
pub mod modes {
    pub const DISPLAY_ON: u8 = 0b001;
    pub const DOZE: u8 = 0b010;
    pub const DISPLAY_OFF: u8 = 0b100;
    pub const ALL: u8 = DISPLAY_ON | DOZE | DISPLAY_OFF;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_res_code_packing() {
        let code = pack_res_code(0x03, 0x00ff);
        assert_eq!(res_type(code), 0x03);
        assert_eq!(res_id(code), 0x00ff);
        assert_eq!(code, 0x0003_00ff);
    }

    #[test]
    fn test_signal_key_layout() {
        let key = signal_key(0x0102, 0xdead_beef);
        assert_eq!(key >> 32, 0x0102);
        assert_eq!(key & 0xffff_ffff, 0xdead_beef);
    }

    #[test]
    fn test_tier_resolution() {
        assert_eq!(
            PriorityTier::resolve(Permission::System, true),
            PriorityTier::SystemHigh
        );
        assert_eq!(
            PriorityTier::resolve(Permission::ThirdParty, false),
            PriorityTier::ThirdPartyLow
        );
    }

    #[test]
    fn test_tier_order_is_arbitration_order() {
        assert!(PriorityTier::SystemHigh < PriorityTier::SystemLow);
        assert!(PriorityTier::SystemLow < PriorityTier::ThirdPartyHigh);
        assert!(PriorityTier::ThirdPartyHigh < PriorityTier::ThirdPartyLow);
    }
}
