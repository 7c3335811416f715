// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod inspect;
pub mod refresh;
pub mod session;
pub mod store;
#[cfg(test)]
pub mod test_support;
