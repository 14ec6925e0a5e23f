// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

pub mod chat;
pub mod config;
pub mod driver;
pub mod message;
pub mod stream;
pub mod transport;
