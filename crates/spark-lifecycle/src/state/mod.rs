//! 生命周期阶段（Phase）的查询面与迁移面。
//!
//! ## 设计目标（Why）
//! - 把“端点当前处于哪个阶段”收敛为单一枚举 [`Phase`]，所有并发调用方通过同一个共享字
//!   （[`StateWord`]/[`ExStateWord`]）观察与推进阶段，避免在多个字段之间做非原子的交叉判断；
//! - 查询（[`State`]/[`ExState`]）与迁移（[`StateTransition`]/[`ExStateTransition`]）分离：
//!   只需要读状态的组件拿到只读视图即可，迁移入口只暴露给编排器。
//!
//! ## 契约说明（What）
//! - 迁移全部以单字 CAS 完成，返回带判别信息的结果（[`Transition`]、[`Closing`]），
//!   编排器据此得知“自己从哪个阶段赢得了迁移”，无需事后重读状态；
//! - 共享字在阶段之外还携带周期纪元 [`Epoch`]：每个“开启新周期”的迁移会推进纪元，
//!   已发布的 Promise 以纪元打标，竞争失败的调用方只会拿到与自己观测到的纪元匹配的 Promise。

mod word;

pub use word::{ExStateWord, StateWord};

use core::fmt;

/// 端点生命周期阶段。
///
/// 数值编码构成全序，仅供 CAS 编码使用；基础状态机只使用 `Closed/Closing/Opening/Opened`，
/// 扩展状态机额外使用 `Exporting/Exported`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// 已关闭，也是初始阶段。
    Closed = 0,
    /// 关闭流程进行中。
    Closing = 1,
    /// 导出（注册/绑定资源）进行中。
    Exporting = 2,
    /// 已导出，尚未对外提供流量。
    Exported = 3,
    /// 打开流程进行中。
    Opening = 4,
    /// 已打开，可以收发流量。
    Opened = 5,
}

impl Phase {
    /// 全部阶段，按数值编码排列。
    pub const ALL: [Phase; 6] = [
        Phase::Closed,
        Phase::Closing,
        Phase::Exporting,
        Phase::Exported,
        Phase::Opening,
        Phase::Opened,
    ];

    /// 返回阶段的数值编码。
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// 由数值编码还原阶段；未知编码返回 `None`。
    pub const fn from_u8(raw: u8) -> Option<Phase> {
        match raw {
            0 => Some(Phase::Closed),
            1 => Some(Phase::Closing),
            2 => Some(Phase::Exporting),
            3 => Some(Phase::Exported),
            4 => Some(Phase::Opening),
            5 => Some(Phase::Opened),
            _ => None,
        }
    }

    /// `Opening` 或 `Opened`。
    pub const fn is_open(self) -> bool {
        matches!(self, Phase::Opening | Phase::Opened)
    }

    /// `Closing` 或 `Closed`。
    pub const fn is_close(self) -> bool {
        matches!(self, Phase::Closing | Phase::Closed)
    }

    /// `Exporting` 或 `Exported`。
    pub const fn is_export(self) -> bool {
        matches!(self, Phase::Exporting | Phase::Exported)
    }

    /// 稳定的小写名称，用于日志字段。
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Closed => "closed",
            Phase::Closing => "closing",
            Phase::Exporting => "exporting",
            Phase::Exported => "exported",
            Phase::Opening => "opening",
            Phase::Opened => "opened",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生命周期周期纪元。
///
/// 纪元只增不减（在 56 位空间内回绕），每次 `try_opening`、`try_exporting`、`try_closing`
/// 以及回滚用的 `translate` 成功时推进；确认类迁移（`try_opened`、`try_exported`、
/// `try_closed`、`to_closed`）保持纪元不变。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    /// 纪元可用的位宽上限（低 8 位留给阶段编码）。
    pub const MAX: u64 = (1 << 56) - 1;

    /// 初始纪元。
    pub const ZERO: Epoch = Epoch(0);

    /// 由原始数值构造，超出位宽的部分被截断。
    pub const fn new(raw: u64) -> Self {
        Self(raw & Self::MAX)
    }

    /// 读取原始数值。
    pub const fn get(self) -> u64 {
        self.0
    }

    /// 下一个纪元。
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1) & Self::MAX)
    }

    /// 上一个纪元；关闭流程据此定位被它打断的在途周期。
    pub const fn prev(self) -> Self {
        Self(self.0.wrapping_sub(1) & Self::MAX)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 共享字某一瞬间的读数：阶段 + 纪元。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhaseSnapshot {
    /// 读数时的阶段。
    pub phase: Phase,
    /// 读数时的纪元。
    pub epoch: Epoch,
}

/// 单一起点迁移的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Transition {
    /// 迁移成功，携带迁移后的纪元。
    Success(Epoch),
    /// 起点不满足，携带失败时观测到的读数。
    Failed(PhaseSnapshot),
}

impl Transition {
    /// 是否迁移成功。
    pub const fn is_success(&self) -> bool {
        matches!(self, Transition::Success(_))
    }
}

/// `try_closing` 的结果，区分赢得关闭权时所处的起点阶段。
///
/// 编排器据此选择关闭路径：`FromOpening`/`FromExporting` 需要等待在途操作的 Promise，
/// `FromOpened`/`FromExported` 走常规的优雅关闭路径。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Closing {
    /// 从 `Opening` 进入 `Closing`。
    FromOpening(Epoch),
    /// 从 `Opened` 进入 `Closing`。
    FromOpened(Epoch),
    /// 从 `Exporting` 进入 `Closing`（仅扩展状态机）。
    FromExporting(Epoch),
    /// 从 `Exported` 进入 `Closing`（仅扩展状态机）。
    FromExported(Epoch),
    /// 当前已处于全部允许起点之外（已在关闭或已关闭），调用方应等待现有的关闭 Promise。
    Failed(PhaseSnapshot),
}

impl Closing {
    /// 赢得关闭权时的纪元；失败返回 `None`。
    pub const fn epoch(&self) -> Option<Epoch> {
        match self {
            Closing::FromOpening(epoch)
            | Closing::FromOpened(epoch)
            | Closing::FromExporting(epoch)
            | Closing::FromExported(epoch) => Some(*epoch),
            Closing::Failed(_) => None,
        }
    }

    /// 赢得关闭权时的起点阶段；失败返回 `None`。
    pub const fn origin(&self) -> Option<Phase> {
        match self {
            Closing::FromOpening(_) => Some(Phase::Opening),
            Closing::FromOpened(_) => Some(Phase::Opened),
            Closing::FromExporting(_) => Some(Phase::Exporting),
            Closing::FromExported(_) => Some(Phase::Exported),
            Closing::Failed(_) => None,
        }
    }
}

/// 生命周期阶段的只读查询面。
///
/// 全部方法均为无副作用、非阻塞的谓词。
pub trait State {
    /// 当前阶段。
    fn phase(&self) -> Phase;

    fn is_opening(&self) -> bool {
        self.phase() == Phase::Opening
    }

    fn is_opened(&self) -> bool {
        self.phase() == Phase::Opened
    }

    fn is_closing(&self) -> bool {
        self.phase() == Phase::Closing
    }

    fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// `is_opening() || is_opened()`，基于同一次读数。
    fn is_open(&self) -> bool {
        self.phase().is_open()
    }

    /// `is_closing() || is_closed()`，基于同一次读数。
    fn is_close(&self) -> bool {
        self.phase().is_close()
    }
}

/// 扩展（两阶段启动）查询面。
pub trait ExState: State {
    fn is_exporting(&self) -> bool {
        self.phase() == Phase::Exporting
    }

    fn is_exported(&self) -> bool {
        self.phase() == Phase::Exported
    }

    /// `is_exporting() || is_exported()`，基于同一次读数。
    fn is_export(&self) -> bool {
        self.phase().is_export()
    }
}

/// 生命周期迁移面。
///
/// # 契约说明（What）
/// - 所有迁移都是无锁的单字 CAS，成功后对所有线程立即可见；
/// - `try_closing` 在内部循环重读：要么从某个允许起点赢得 CAS，要么发现当前阶段已不在允许
///   起点之内并返回 [`Closing::Failed`]；
/// - `to_closed` 是无条件写入，只能由已经赢得关闭权的关闭流程在终止步骤调用。
pub trait StateTransition: State {
    /// 读取阶段与纪元。
    fn snapshot(&self) -> PhaseSnapshot;

    /// `Closed`（基础）/ `Exported`（扩展）→ `Opening`，推进纪元。
    fn try_opening(&self) -> Transition;

    /// `Opening` → `Opened`。
    fn try_opened(&self) -> Transition;

    /// 允许起点 → `Closing`，推进纪元。
    fn try_closing(&self) -> Closing;

    /// `Closing` → `Closed`。
    fn try_closed(&self) -> Transition;

    /// 无条件写入 `Closed`（保留纪元），返回写入前的读数。
    fn to_closed(&self) -> PhaseSnapshot;
}

/// 扩展迁移面：导出阶段与回滚辅助。
pub trait ExStateTransition: StateTransition + ExState {
    /// `Closed` → `Exporting`，推进纪元。
    fn try_exporting(&self) -> Transition;

    /// `Exporting` → `Exported`。
    fn try_exported(&self) -> Transition;

    /// 调用方指定起止阶段的 CAS，推进纪元；用于打开失败时 `Opening` → `Exported` 的回滚。
    fn translate(&self, from: Phase, to: Phase) -> Transition;
}

/// 编排器内部使用的共享字抽象，区分基础与两阶段启动两种变体。
pub(crate) trait CycleWord: StateTransition + Send + Sync + 'static {
    /// 是否为两阶段启动（导出 → 打开）变体。
    const TWO_PHASE: bool;

    /// 处于 `Closed`、纪元为 0 的新字。
    fn fresh() -> Self;

    /// 打开失败时的回滚；基础变体不支持回滚，直接返回当前读数。
    fn rollback_open(&self) -> Transition {
        Transition::Failed(self.snapshot())
    }
}
