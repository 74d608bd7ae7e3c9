// SPDX-License-Identifier: MIT
//
// Typed errors for every allocator failure mode: reserve failure, commit
// failure, fixed-size exhaustion, oversized tagged allocation, double free,
// and programmer misuse of mode-specific calls.

/// An allocator failure, carrying the allocator's `name` label so the
/// message is actionable without a debugger attached.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// `reserve` failed: the OS would not hand back the requested address
    /// space.
    #[error("{label}: failed to reserve {requested} bytes of virtual address space")]
    OutOfVirtualAddress { label: &'static str, requested: usize },

    /// `commit` failed during init or growth.
    #[error("{label}: failed to commit {requested} bytes")]
    OutOfCommittedMemory { label: &'static str, requested: usize },

    /// A fixed-size arena/pool/tagged heap cannot grow further.
    #[error("{label}: fixed-size allocator exhausted its backing buffer")]
    FixedSizeExhausted { label: &'static str },

    /// `TaggedHeap::alloc` was asked for more than `arena_size` bytes.
    #[error(
        "{label}: requested allocation of {requested} bytes exceeds the tagged heap's sub-arena size of {max}"
    )]
    TagAllocTooLarge {
        label: &'static str,
        requested: usize,
        max: usize,
    },

    /// `Pool::release` found the pointer already on the free list.
    #[error("{label}: pointer was already released to this pool")]
    DoubleFree { label: &'static str },

    /// `pop` on a non-stack arena, `init` vs `fixed_init` confusion, or an
    /// out-of-range tag.
    #[error("{label}: {reason}")]
    ModeMisuse {
        label: &'static str,
        reason: &'static str,
    },
}

impl AllocError {
    /// Re-stamp an error surfaced by the OVMF layer (which only knows the
    /// generic `"os"` label) with the calling allocator's own label.
    pub(crate) fn with_label(self, label: &'static str) -> Self {
        match self {
            Self::OutOfVirtualAddress { requested, .. } => {
                Self::OutOfVirtualAddress { label, requested }
            }
            Self::OutOfCommittedMemory { requested, .. } => {
                Self::OutOfCommittedMemory { label, requested }
            }
            Self::FixedSizeExhausted { .. } => Self::FixedSizeExhausted { label },
            Self::TagAllocTooLarge { requested, max, .. } => {
                Self::TagAllocTooLarge { label, requested, max }
            }
            Self::DoubleFree { .. } => Self::DoubleFree { label },
            Self::ModeMisuse { reason, .. } => Self::ModeMisuse { label, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_include_the_label_and_the_relevant_numbers() {
        let err = AllocError::OutOfVirtualAddress {
            label: "arena",
            requested: 4096,
        };
        assert_eq!(err.to_string(), "arena: failed to reserve 4096 bytes of virtual address space");

        let err = AllocError::TagAllocTooLarge {
            label: "heap",
            requested: 5000,
            max: 4096,
        };
        assert_eq!(
            err.to_string(),
            "heap: requested allocation of 5000 bytes exceeds the tagged heap's sub-arena size of 4096"
        );

        let err = AllocError::DoubleFree { label: "pool" };
        assert_eq!(err.to_string(), "pool: pointer was already released to this pool");

        let err = AllocError::ModeMisuse {
            label: "arena",
            reason: "pop requires Stack mode",
        };
        assert_eq!(err.to_string(), "arena: pop requires Stack mode");
    }

    #[test]
    fn with_label_rewrites_the_label_and_preserves_every_other_field() {
        let err = AllocError::OutOfCommittedMemory {
            label: "os",
            requested: 65536,
        }
        .with_label("pool");
        assert!(matches!(
            err,
            AllocError::OutOfCommittedMemory {
                label: "pool",
                requested: 65536,
            }
        ));

        let err = AllocError::TagAllocTooLarge {
            label: "os",
            requested: 100,
            max: 64,
        }
        .with_label("heap");
        assert!(matches!(
            err,
            AllocError::TagAllocTooLarge {
                label: "heap",
                requested: 100,
                max: 64,
            }
        ));
    }
}
