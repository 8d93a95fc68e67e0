// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

/// Services the surrounding platform provides to the host.
pub trait HsmmcPlatform: Send + Sync {
    /// Busy-waits for `us` microseconds.
    fn udelay(&self, us: u32);

    /// Takes a runtime power reference, enabling the controller clocks.
    fn runtime_get(&self);

    /// Drops a runtime power reference.
    fn runtime_put(&self);

    /// Whether the controller lost its register context since it was last
    /// powered. Checked after every [`runtime_get`](Self::runtime_get).
    fn context_was_lost(&self) -> bool;

    /// Rate of the functional clock in Hz.
    fn fclk_rate(&self) -> u32;

    /// Queues [`HsmmcHost::run_detect_work`](crate::HsmmcHost::run_detect_work)
    /// on a context that may sleep.
    fn schedule_detect(&self);

    /// Masks the controller interrupt line.
    fn disable_irq_line(&self) {}

    fn enable_irq_line(&self) {}
}
