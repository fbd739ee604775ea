//! VM parameters and the reserved register layout.

use camel_asm::RegisterId;

/* RESERVED REGISTERS */

/// Holds the invocant for method bodies; undef elsewhere.
pub const REG_SELF: RegisterId = 0x00;

/// Holds `@_`, aliased to the caller's argument slots.
pub const REG_ARGS: RegisterId = 0x01;

/// Holds the calling-context tag read by `wantarray`.
pub const REG_CTX: RegisterId = 0x02;

/// First register available to captures and user lexicals.
pub const REG_USER_BASE: RegisterId = 0x03;

/* LIMITS */

/// Register indices are one code word, so a body cannot name more slots
/// than this.
pub const VM_MAX_REGISTERS: u16 = u16::MAX;

/// Call-frame slots preallocated per interpreter instance.
pub const FRAME_RING_DEPTH: usize = 64;

/// Refuse deeper call chains; guards the host stack, since each bytecode
/// call nests one host call. `goto &NAME` tail calls don't count against
/// it.
pub const MAX_CALL_DEPTH: usize = 256;

/// Default `eval STRING` compilation-cache capacity.
pub const EVAL_CACHE_CAPACITY: usize = 256;

/// Emission ceiling in code words before an oversized list literal is
/// chunked into nested anonymous subs.
pub const CODE_CHUNK_CEILING: usize = 48 * 1024;

/// Elements per chunk when an oversized list literal is split.
pub const LIST_CHUNK_LEN: usize = 512;
