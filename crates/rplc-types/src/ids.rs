use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Mints a fresh globally-unique identity.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(RequestId, "Globally unique identity of a client-side [`Request`](rplc_request).");
uuid_id!(JobId, "Globally unique identity of a Controller-owned Job.");
uuid_id!(ControllerId, "Globally unique identity of a Controller process.");

macro_rules! monotonic_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn get(self) -> u64 {
                self.0
            }

            /// Returns the next id in sequence. Used by in-memory id minters.
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

monotonic_id!(TransactionId, "Monotonic 64-bit identity of a super-transaction, minted by `DatabaseServices`.");
monotonic_id!(ContributionId, "Monotonic identity of a contribution, unique within its owning transaction's services instance.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn monotonic_ids_increment() {
        let id = TransactionId::new(1);
        assert_eq!(id.next().get(), 2);
    }

    #[test]
    fn uuid_id_roundtrips_through_display() {
        let id = ControllerId::new();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 36);
    }
}
