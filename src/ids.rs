//! Opaque identifiers for the kernel-owned object families.
//!
//! Every family is stored in the `Simulation` arena by index rather than
//! by pointer: a queued request can reference its process by id without
//! creating a cycle, and preemption can find a process from inside a
//! resource's `active` set the same way.

macro_rules! id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub(crate) fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

id_type!(ProcessId, "Identifies a process within its owning `Simulation`.");
id_type!(ResourceId, "Identifies a counted `Resource` within its owning `Simulation`.");
id_type!(BufferId, "Identifies a `Buffer` within its owning `Simulation`.");
id_type!(StoreId, "Identifies a `Store` within its owning `Simulation`.");
id_type!(SimEventId, "Identifies a `SimEvent` within its owning `Simulation`.");
