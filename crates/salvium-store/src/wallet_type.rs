//! Wallet type tags stored alongside queued actions.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};

/// Kind of wallet an action belongs to. Persisted as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalletType {
    Standard = 0,
    RateLimited = 1,
    AtomicSwap = 2,
    AuthorizedPayee = 3,
    MultiSig = 4,
    Custody = 5,
    ColouredCoin = 6,
    Recoverable = 7,
    DistributedId = 8,
}

impl WalletType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for WalletType {
    type Error = StoreError;

    fn try_from(v: i64) -> Result<Self, StoreError> {
        Ok(match v {
            0 => Self::Standard,
            1 => Self::RateLimited,
            2 => Self::AtomicSwap,
            3 => Self::AuthorizedPayee,
            4 => Self::MultiSig,
            5 => Self::Custody,
            6 => Self::ColouredCoin,
            7 => Self::Recoverable,
            8 => Self::DistributedId,
            _ => return Err(StoreError::InvalidWalletType(v)),
        })
    }
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Standard => "standard",
            Self::RateLimited => "rate-limited",
            Self::AtomicSwap => "atomic-swap",
            Self::AuthorizedPayee => "authorized-payee",
            Self::MultiSig => "multisig",
            Self::Custody => "custody",
            Self::ColouredCoin => "coloured-coin",
            Self::Recoverable => "recoverable",
            Self::DistributedId => "distributed-id",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        if let Ok(n) = s.parse::<i64>() {
            return Self::try_from(n).map_err(|e| e.to_string());
        }
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "rate-limited" => Ok(Self::RateLimited),
            "atomic-swap" => Ok(Self::AtomicSwap),
            "authorized-payee" => Ok(Self::AuthorizedPayee),
            "multisig" => Ok(Self::MultiSig),
            "custody" => Ok(Self::Custody),
            "coloured-coin" => Ok(Self::ColouredCoin),
            "recoverable" => Ok(Self::Recoverable),
            "distributed-id" => Ok(Self::DistributedId),
            _ => Err(format!("unknown wallet type: {}", s)),
        }
    }
}
