use crate::opcode::consts::InvalidOpcode;

/// Sub-operation selector following a `SLOW_OP` opcode word.
///
/// These operations are rare enough that routing them through a second
/// dispatch keeps the hot loop small; the extra indirection is noise
/// against their body cost. Process-control and IPC entries are cataloged
/// for encoding stability but rejected at runtime — the execution core's
/// I/O surface does not model them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
#[repr(u16)]
#[non_exhaustive]
pub enum SlowOp {
    /// Compile and run a source string: `rd, r_src, scope_sid`. The
    /// scope word names an interned descriptor of the lexicals visible
    /// at the eval site, so the eval'd code can close over them.
    EvalString = 0x00,
    /// `rd, r_arr, r_off, r_len, n, r_first`.
    Splice = 0x01,
    /// `rd, r_list, flags`.
    Sort = 0x02,
    /// `rd, r_list`.
    Reverse = 0x03,
    /// `rd, r_secs`.
    Sleep = 0x04,
    /// `rd, r_depth, ctx`.
    Caller = 0x05,
    /// Save a dynamic binding: `name, kind`.
    LocalSave = 0x06,
    /// Restore the `n` most recent dynamic bindings: `n`.
    LocalRestore = 0x07,
    /// `rd, r_target, n, r_first`.
    Tie = 0x08,
    /// `rd, r_target`.
    Untie = 0x09,
    /// `rd, r_secs`.
    Alarm = 0x0a,
    /// `rd, n, r_first`.
    Open = 0x0b,
    /// `rd, r_fh`.
    Close = 0x0c,
    /// `rd, r_fh`.
    Readline = 0x0d,
    /// `rd, r_fh`.
    Eof = 0x0e,
    /// `rd, r_fh, r_pos, r_whence`.
    Seek = 0x0f,
    /// `rd, r_fh`.
    Tell = 0x10,
    /// `r_fh, n, r_first`.
    PrintFh = 0x11,
    /// Named-character-sequence lookup: `rd, r_name`.
    Charname = 0x12,
    Kill = 0x13,
    Waitpid = 0x14,
    System = 0x15,
    Exec = 0x16,
    Chmod = 0x17,
    Socket = 0x18,
    Bind = 0x19,
    Listen = 0x1a,
    Accept = 0x1b,
    Msgget = 0x1c,
    Semget = 0x1d,
    Shmget = 0x1e,
    FormatWrite = 0x1f,
}

impl SlowOp {
    /// Number of operand code words following the sub-operation word.
    pub const fn operand_words(self) -> usize {
        use SlowOp::*;
        match self {
            EvalString => 3,
            Splice => 6,
            Sort => 3,
            Reverse => 2,
            Sleep => 2,
            Caller => 3,
            LocalSave => 2,
            LocalRestore => 1,
            Tie => 4,
            Untie => 2,
            Alarm => 2,
            Open => 3,
            Close | Readline | Eof | Tell => 2,
            Seek => 4,
            PrintFh => 3,
            Charname => 2,
            // Uniform builtin-style operand shape for the rejected set.
            Kill | Waitpid | System | Exec | Chmod | Socket | Bind | Listen
            | Accept | Msgget | Semget | Shmget | FormatWrite => 3,
        }
    }
}

impl TryFrom<u16> for SlowOp {
    type Error = InvalidOpcode;

    fn try_from(word: u16) -> Result<Self, InvalidOpcode> {
        use SlowOp::*;
        Ok(match word {
            0x00 => EvalString,
            0x01 => Splice,
            0x02 => Sort,
            0x03 => Reverse,
            0x04 => Sleep,
            0x05 => Caller,
            0x06 => LocalSave,
            0x07 => LocalRestore,
            0x08 => Tie,
            0x09 => Untie,
            0x0a => Alarm,
            0x0b => Open,
            0x0c => Close,
            0x0d => Readline,
            0x0e => Eof,
            0x0f => Seek,
            0x10 => Tell,
            0x11 => PrintFh,
            0x12 => Charname,
            0x13 => Kill,
            0x14 => Waitpid,
            0x15 => System,
            0x16 => Exec,
            0x17 => Chmod,
            0x18 => Socket,
            0x19 => Bind,
            0x1a => Listen,
            0x1b => Accept,
            0x1c => Msgget,
            0x1d => Semget,
            0x1e => Shmget,
            0x1f => FormatWrite,
            _ => return Err(InvalidOpcode),
        })
    }
}
