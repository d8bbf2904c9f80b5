//! 共享字迁移表的性质验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：`StateWord`/`ExStateWord` 是整个编排器唯一的同步点，任何迁移表错误
//!   （允许了非法起点、纪元推进与否搞反）都会让竞争失败的调用方等待错误周期的 Promise。
//! - **设计手法 (How)**：
//!   1. 以 Proptest 生成任意操作序列，同时驱动真实共享字与纯 Rust 影子模型，逐步比较迁移结果；
//!   2. 以 Loom 穷举并发 `try_opening`/`try_closing` 的调度交错，断言“每个起点恰有一个赢家”。
//! - **合同 (What)**：
//!   - 失败的迁移不改变读数，且报告失败瞬间的读数；
//!   - 纪元单调：只有 `try_opening`/`try_exporting`/`try_closing`/`translate` 推进纪元；
//!   - `to_closed` 从任意阶段写入 `Closed` 并返回之前的读数。
//!
//! # 设计考量 (Trade-offs)
//!
//! - 影子模型刻意写成逐条 `match`，与生产实现的“起点集合 + CAS 循环”形态不同，避免两处同错；
//! - Loom 场景只覆盖两线程，三线程以上的状态空间在 CI 上耗时过长。

#[cfg(not(any(loom, spark_loom)))]
mod shadow {
    use proptest::prelude::*;
    use spark_lifecycle::{
        Closing, Epoch, ExStateTransition, ExStateWord, Phase, PhaseSnapshot, StateTransition,
        StateWord, Transition,
    };

    /// 共享字上的一次调用。
    #[derive(Clone, Copy, Debug)]
    enum Op {
        Opening,
        Opened,
        Closing,
        Closed,
        ToClosed,
        Exporting,
        Exported,
        Rollback,
    }

    /// 一次调用的可比较结果。
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Outcome {
        Moved(Transition),
        Closing(Closing),
        Forced(PhaseSnapshot),
    }

    /// 影子状态机：只记录阶段与纪元。
    #[derive(Debug)]
    struct Shadow {
        two_phase: bool,
        phase: Phase,
        epoch: Epoch,
    }

    impl Shadow {
        fn new(two_phase: bool) -> Self {
            Self {
                two_phase,
                phase: Phase::Closed,
                epoch: Epoch::ZERO,
            }
        }

        fn snapshot(&self) -> PhaseSnapshot {
            PhaseSnapshot {
                phase: self.phase,
                epoch: self.epoch,
            }
        }

        fn fail(&self) -> Outcome {
            Outcome::Moved(Transition::Failed(self.snapshot()))
        }

        fn go(&mut self, to: Phase, bump: bool) -> Outcome {
            if bump {
                self.epoch = self.epoch.next();
            }
            self.phase = to;
            Outcome::Moved(Transition::Success(self.epoch))
        }

        fn apply(&mut self, op: Op) -> Outcome {
            match (op, self.phase) {
                (Op::Opening, Phase::Closed) if !self.two_phase => self.go(Phase::Opening, true),
                (Op::Opening, Phase::Exported) if self.two_phase => self.go(Phase::Opening, true),
                (Op::Opened, Phase::Opening) => self.go(Phase::Opened, false),
                (Op::Closed, Phase::Closing) => self.go(Phase::Closed, false),
                (Op::Exporting, Phase::Closed) if self.two_phase => self.go(Phase::Exporting, true),
                (Op::Exported, Phase::Exporting) if self.two_phase => self.go(Phase::Exported, false),
                (Op::Rollback, Phase::Opening) if self.two_phase => self.go(Phase::Exported, true),
                (Op::Closing, origin) => self.enter_closing(origin),
                (Op::ToClosed, _) => {
                    let previous = self.snapshot();
                    self.phase = Phase::Closed;
                    Outcome::Forced(previous)
                }
                _ => self.fail(),
            }
        }

        fn enter_closing(&mut self, origin: Phase) -> Outcome {
            let allowed = match origin {
                Phase::Opening | Phase::Opened => true,
                Phase::Exporting | Phase::Exported => self.two_phase,
                Phase::Closing | Phase::Closed => false,
            };
            if !allowed {
                return Outcome::Closing(Closing::Failed(self.snapshot()));
            }
            self.epoch = self.epoch.next();
            self.phase = Phase::Closing;
            Outcome::Closing(match origin {
                Phase::Opening => Closing::FromOpening(self.epoch),
                Phase::Opened => Closing::FromOpened(self.epoch),
                Phase::Exporting => Closing::FromExporting(self.epoch),
                _ => Closing::FromExported(self.epoch),
            })
        }
    }

    fn apply_base(word: &StateWord, op: Op) -> Option<Outcome> {
        Some(match op {
            Op::Opening => Outcome::Moved(word.try_opening()),
            Op::Opened => Outcome::Moved(word.try_opened()),
            Op::Closing => Outcome::Closing(word.try_closing()),
            Op::Closed => Outcome::Moved(word.try_closed()),
            Op::ToClosed => Outcome::Forced(word.to_closed()),
            Op::Exporting | Op::Exported | Op::Rollback => return None,
        })
    }

    fn apply_extended(word: &ExStateWord, op: Op) -> Outcome {
        match op {
            Op::Opening => Outcome::Moved(word.try_opening()),
            Op::Opened => Outcome::Moved(word.try_opened()),
            Op::Closing => Outcome::Closing(word.try_closing()),
            Op::Closed => Outcome::Moved(word.try_closed()),
            Op::ToClosed => Outcome::Forced(word.to_closed()),
            Op::Exporting => Outcome::Moved(word.try_exporting()),
            Op::Exported => Outcome::Moved(word.try_exported()),
            Op::Rollback => Outcome::Moved(word.translate(Phase::Opening, Phase::Exported)),
        }
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Opening),
            3 => Just(Op::Opened),
            3 => Just(Op::Closing),
            2 => Just(Op::Closed),
            1 => Just(Op::ToClosed),
            3 => Just(Op::Exporting),
            3 => Just(Op::Exported),
            1 => Just(Op::Rollback),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_base_word_matches_shadow(ops in prop::collection::vec(op(), 1..64)) {
            let word = StateWord::new();
            let mut shadow = Shadow::new(false);
            for (index, op) in ops.into_iter().enumerate() {
                let Some(actual) = apply_base(&word, op) else { continue };
                let expected = shadow.apply(op);
                prop_assert_eq!(actual, expected, "第 {} 步 {:?} 结果不一致", index, op);
                prop_assert_eq!(word.snapshot(), shadow.snapshot());
            }
        }

        #[test]
        fn prop_extended_word_matches_shadow(ops in prop::collection::vec(op(), 1..64)) {
            let word = ExStateWord::new();
            let mut shadow = Shadow::new(true);
            for (index, op) in ops.into_iter().enumerate() {
                let actual = apply_extended(&word, op);
                let expected = shadow.apply(op);
                prop_assert_eq!(actual, expected, "第 {} 步 {:?} 结果不一致", index, op);
                prop_assert_eq!(word.snapshot(), shadow.snapshot());
            }
        }

        #[test]
        fn prop_epoch_never_decreases(ops in prop::collection::vec(op(), 1..64)) {
            let word = ExStateWord::new();
            let mut last = word.snapshot().epoch;
            for op in ops {
                let _ = apply_extended(&word, op);
                let now = word.snapshot().epoch;
                prop_assert!(now >= last);
                last = now;
            }
        }
    }
}

#[cfg(any(loom, spark_loom))]
mod loom_scenarios {
    //! 共享字 CAS 的 Loom 并发模型。
    //!
    //! - **Why**：“并发打开只有一个赢家、并发关闭只有一个赢家”完全取决于共享字的
    //!   CAS 循环，编排器只是在其之上派发工作；
    //! - **How**：两个线程同时对同一个共享字发起迁移，`loom::model` 穷举交错；
    //! - **What**：赢家数量恰为 1，且最终读数与赢家报告的纪元一致。

    use loom::{model, sync::Arc, thread};
    use spark_lifecycle::{
        Closing, ExStateTransition, ExStateWord, Phase, StateTransition, StateWord,
    };

    #[test]
    fn concurrent_openers_elect_one_winner() {
        model(|| {
            let word = Arc::new(StateWord::new());
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let word = Arc::clone(&word);
                    thread::spawn(move || word.try_opening())
                })
                .collect();
            let outcomes: Vec<_> = handles
                .into_iter()
                .map(|handle| handle.join().expect("线程不应 panic"))
                .collect();

            let winners = outcomes.iter().filter(|outcome| outcome.is_success()).count();
            assert_eq!(winners, 1);
            let snapshot = word.snapshot();
            assert_eq!(snapshot.phase, Phase::Opening);
            assert_eq!(snapshot.epoch.get(), 1);
        });
    }

    #[test]
    fn close_racing_confirmation_has_one_outcome() {
        model(|| {
            let word = Arc::new(StateWord::new());
            assert!(word.try_opening().is_success());

            let opener = {
                let word = Arc::clone(&word);
                thread::spawn(move || word.try_opened())
            };
            let closer = {
                let word = Arc::clone(&word);
                thread::spawn(move || word.try_closing())
            };
            let opened = opener.join().expect("线程不应 panic");
            let closing = closer.join().expect("线程不应 panic");

            //
            // 教案级说明：确认与关闭的两种合法交错。
            // - 关闭先赢：确认失败，关闭报告起点 `Opening`；
            // - 确认先赢：关闭报告起点 `Opened`。
            match closing {
                Closing::FromOpening(_) => assert!(!opened.is_success()),
                Closing::FromOpened(_) => assert!(opened.is_success()),
                other => panic!("关闭必须赢得 CAS：{other:?}"),
            }
            assert_eq!(word.snapshot().phase, Phase::Closing);
            assert_eq!(word.snapshot().epoch.get(), 2);
        });
    }

    #[test]
    fn concurrent_exporter_and_closer_never_lose_the_cycle() {
        model(|| {
            let word = Arc::new(ExStateWord::new());
            assert!(word.try_exporting().is_success());

            let closers: Vec<_> = (0..2)
                .map(|_| {
                    let word = Arc::clone(&word);
                    thread::spawn(move || word.try_closing())
                })
                .collect();
            let winners = closers
                .into_iter()
                .map(|handle| handle.join().expect("线程不应 panic"))
                .filter(|closing| closing.epoch().is_some())
                .count();
            assert_eq!(winners, 1);
            assert!(!word.try_exported().is_success());
        });
    }
}
