/*
 * Copyright (c) Kia Shakiba
 *
 * This source code is licensed under the GNU AGPLv3 license found in the
 * LICENSE file in the root directory of this source tree.
 */

mod config;
mod error;
mod entity;
mod optional;
mod worker;
mod manager;
mod engine;
mod supervisor;

pub mod policy;
pub mod collector;
pub mod monitor;
pub mod controller;
pub mod hypervisor;
pub mod rpc;

pub use crate::config::Config;
pub use crate::error::{DaemonError, PolicyError};
pub use crate::entity::{Entity, EntityRef, Sample};
pub use crate::optional::Optional;
pub use crate::manager::GuestManager;
pub use crate::engine::PolicyEngine;
pub use crate::supervisor::Supervisor;
pub use crate::worker::{Worker, register_worker};

pub use crate::policy::{PolicyStore, Value, ValueMap};
