use crate::opcode::consts::InvalidOpcode;

/// Identifier of a built-in operation reachable through `CALL_BUILTIN`.
///
/// Built-ins share the register calling convention of user subs: the
/// instruction names the destination register and a run of consecutive
/// argument registers. Operations too rare to deserve a hot-dispatch slot
/// live in [`crate::SlowOp`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
#[repr(u16)]
#[non_exhaustive]
pub enum Builtin {
    Abs = 0x00,
    Int = 0x01,
    Sqrt = 0x02,
    Uc = 0x03,
    Lc = 0x04,
    Ucfirst = 0x05,
    Lcfirst = 0x06,
    Ord = 0x07,
    Chr = 0x08,
    Hex = 0x09,
    Oct = 0x0a,
    Index = 0x0b,
    Rindex = 0x0c,
    Join = 0x0d,
    Sprintf = 0x0e,
    Ref = 0x0f,
    Bless = 0x10,
    Chomp = 0x11,
    Chop = 0x12,
    /// `tr///` with a replacement set; mutates its target.
    TrReplace = 0x13,
    /// Counting-only `tr///`; never mutates, so read-only targets are fine.
    TrCount = 0x14,
    /// Scalar::Util `weaken`.
    Weaken = 0x15,
    /// Scalar::Util `dualvar`.
    Dualvar = 0x16,
    /// Per-hash `each` iteration step.
    Each = 0x17,
    /// The tri-valued context query.
    Wantarray = 0x18,
}

impl TryFrom<u16> for Builtin {
    type Error = InvalidOpcode;

    fn try_from(word: u16) -> Result<Self, InvalidOpcode> {
        use Builtin::*;
        Ok(match word {
            0x00 => Abs,
            0x01 => Int,
            0x02 => Sqrt,
            0x03 => Uc,
            0x04 => Lc,
            0x05 => Ucfirst,
            0x06 => Lcfirst,
            0x07 => Ord,
            0x08 => Chr,
            0x09 => Hex,
            0x0a => Oct,
            0x0b => Index,
            0x0c => Rindex,
            0x0d => Join,
            0x0e => Sprintf,
            0x0f => Ref,
            0x10 => Bless,
            0x11 => Chomp,
            0x12 => Chop,
            0x13 => TrReplace,
            0x14 => TrCount,
            0x15 => Weaken,
            0x16 => Dualvar,
            0x17 => Each,
            0x18 => Wantarray,
            _ => return Err(InvalidOpcode),
        })
    }
}
