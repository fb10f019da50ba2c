//! # Mapping request flags

bitflags! {
    /// Access protection requested for a mapping.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ProtFlags: usize {
        const PROT_READ = 0x1;
        const PROT_WRITE = 0x2;
        const PROT_EXEC = 0x4;
    }
}

bitflags! {
    /// Sharing semantics of a mapping.
    ///
    /// `MAP_SHARED` propagates dirty pages back to the file at unmap time;
    /// `MAP_PRIVATE` never writes back.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MapFlags: usize {
        const MAP_SHARED = 0x1;
        const MAP_PRIVATE = 0x2;
    }
}
