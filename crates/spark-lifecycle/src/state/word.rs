//! 以单个原子整数编码阶段与纪元的共享字。
//!
//! 位布局：低 8 位为 [`Phase`] 编码，高 56 位为 [`Epoch`]。所有写入均通过
//! `compare_exchange`（`SeqCst`）完成，保证每个线程观测到同一全序的阶段变化。

// 启用 `--cfg loom` 时切换到 Loom 的原子类型，使模型检查能够穷举 CAS 的调度交错。
#[cfg(not(any(loom, spark_loom)))]
use core::sync::atomic::{AtomicU64, Ordering};
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicU64, Ordering};

use core::fmt;

use super::{
    Closing, CycleWord, Epoch, ExState, ExStateTransition, Phase, PhaseSnapshot, State,
    StateTransition, Transition,
};

const PHASE_BITS: u32 = 8;
const PHASE_MASK: u64 = (1 << PHASE_BITS) - 1;

const fn encode(phase: Phase, epoch: Epoch) -> u64 {
    (epoch.get() << PHASE_BITS) | phase.as_u8() as u64
}

fn decode(raw: u64) -> PhaseSnapshot {
    // 字只会被本模块写入合法编码。
    let phase = Phase::from_u8((raw & PHASE_MASK) as u8).unwrap_or(Phase::Closed);
    PhaseSnapshot {
        phase,
        epoch: Epoch::new(raw >> PHASE_BITS),
    }
}

/// 两种共享字变体共用的原子载体。
struct RawWord {
    bits: AtomicU64,
}

impl RawWord {
    fn new() -> Self {
        Self {
            bits: AtomicU64::new(encode(Phase::Closed, Epoch::ZERO)),
        }
    }

    fn load(&self) -> PhaseSnapshot {
        decode(self.bits.load(Ordering::SeqCst))
    }

    /// 从 `from` 迁移到 `to`；`bump` 决定是否推进纪元。
    ///
    /// CAS 失败但阶段仍为 `from` 时（纪元被并发推进过）继续重试，否则报告失败。
    fn transit(&self, from: Phase, to: Phase, bump: bool) -> Transition {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let seen = decode(current);
            if seen.phase != from {
                return Transition::Failed(seen);
            }
            let epoch = if bump { seen.epoch.next() } else { seen.epoch };
            match self.bits.compare_exchange(
                current,
                encode(to, epoch),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Transition::Success(epoch),
                Err(actual) => current = actual,
            }
        }
    }

    /// 从 `origins` 中任一阶段迁移到 `Closing` 并推进纪元。
    ///
    /// 成功返回赢得 CAS 时的起点阶段与新纪元；当前阶段不在 `origins` 中时返回读数。
    fn enter_closing(&self, origins: &[Phase]) -> Result<(Phase, Epoch), PhaseSnapshot> {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let seen = decode(current);
            if !origins.contains(&seen.phase) {
                return Err(seen);
            }
            let epoch = seen.epoch.next();
            match self.bits.compare_exchange(
                current,
                encode(Phase::Closing, epoch),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok((seen.phase, epoch)),
                Err(actual) => current = actual,
            }
        }
    }

    fn store_closed(&self) -> PhaseSnapshot {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let seen = decode(current);
            match self.bits.compare_exchange(
                current,
                encode(Phase::Closed, seen.epoch),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return seen,
                Err(actual) => current = actual,
            }
        }
    }
}

fn classify(outcome: Result<(Phase, Epoch), PhaseSnapshot>) -> Closing {
    match outcome {
        Ok((Phase::Opening, epoch)) => Closing::FromOpening(epoch),
        Ok((Phase::Opened, epoch)) => Closing::FromOpened(epoch),
        Ok((Phase::Exporting, epoch)) => Closing::FromExporting(epoch),
        Ok((Phase::Exported, epoch)) => Closing::FromExported(epoch),
        // 起点集合只包含上述四种阶段。
        Ok((phase, epoch)) => Closing::Failed(PhaseSnapshot { phase, epoch }),
        Err(seen) => Closing::Failed(seen),
    }
}

/// 基础状态机的共享字：`Closed → Opening → Opened → Closing → Closed`。
pub struct StateWord {
    raw: RawWord,
}

impl StateWord {
    const CLOSING_ORIGINS: [Phase; 2] = [Phase::Opening, Phase::Opened];

    /// 创建处于 `Closed`、纪元 0 的共享字。
    pub fn new() -> Self {
        Self { raw: RawWord::new() }
    }
}

impl Default for StateWord {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.raw.load();
        f.debug_struct("StateWord")
            .field("phase", &snapshot.phase)
            .field("epoch", &snapshot.epoch)
            .finish()
    }
}

impl State for StateWord {
    fn phase(&self) -> Phase {
        self.raw.load().phase
    }
}

impl StateTransition for StateWord {
    fn snapshot(&self) -> PhaseSnapshot {
        self.raw.load()
    }

    fn try_opening(&self) -> Transition {
        self.raw.transit(Phase::Closed, Phase::Opening, true)
    }

    fn try_opened(&self) -> Transition {
        self.raw.transit(Phase::Opening, Phase::Opened, false)
    }

    fn try_closing(&self) -> Closing {
        classify(self.raw.enter_closing(&Self::CLOSING_ORIGINS))
    }

    fn try_closed(&self) -> Transition {
        self.raw.transit(Phase::Closing, Phase::Closed, false)
    }

    fn to_closed(&self) -> PhaseSnapshot {
        self.raw.store_closed()
    }
}

impl CycleWord for StateWord {
    const TWO_PHASE: bool = false;

    fn fresh() -> Self {
        Self::new()
    }
}

/// 扩展状态机的共享字：在基础迁移之外支持 `Closed → Exporting → Exported → Opening`。
pub struct ExStateWord {
    raw: RawWord,
}

impl ExStateWord {
    const CLOSING_ORIGINS: [Phase; 4] = [
        Phase::Exporting,
        Phase::Exported,
        Phase::Opening,
        Phase::Opened,
    ];

    /// 创建处于 `Closed`、纪元 0 的共享字。
    pub fn new() -> Self {
        Self { raw: RawWord::new() }
    }
}

impl Default for ExStateWord {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExStateWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.raw.load();
        f.debug_struct("ExStateWord")
            .field("phase", &snapshot.phase)
            .field("epoch", &snapshot.epoch)
            .finish()
    }
}

impl State for ExStateWord {
    fn phase(&self) -> Phase {
        self.raw.load().phase
    }
}

impl ExState for ExStateWord {}

impl StateTransition for ExStateWord {
    fn snapshot(&self) -> PhaseSnapshot {
        self.raw.load()
    }

    fn try_opening(&self) -> Transition {
        self.raw.transit(Phase::Exported, Phase::Opening, true)
    }

    fn try_opened(&self) -> Transition {
        self.raw.transit(Phase::Opening, Phase::Opened, false)
    }

    fn try_closing(&self) -> Closing {
        classify(self.raw.enter_closing(&Self::CLOSING_ORIGINS))
    }

    fn try_closed(&self) -> Transition {
        self.raw.transit(Phase::Closing, Phase::Closed, false)
    }

    fn to_closed(&self) -> PhaseSnapshot {
        self.raw.store_closed()
    }
}

impl ExStateTransition for ExStateWord {
    fn try_exporting(&self) -> Transition {
        self.raw.transit(Phase::Closed, Phase::Exporting, true)
    }

    fn try_exported(&self) -> Transition {
        self.raw.transit(Phase::Exporting, Phase::Exported, false)
    }

    fn translate(&self, from: Phase, to: Phase) -> Transition {
        self.raw.transit(from, to, true)
    }
}

impl CycleWord for ExStateWord {
    const TWO_PHASE: bool = true;

    fn fresh() -> Self {
        Self::new()
    }

    fn rollback_open(&self) -> Transition {
        self.translate(Phase::Opening, Phase::Exported)
    }
}
