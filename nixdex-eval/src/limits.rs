// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Resource-limit handling for evaluator subprocesses.
//!
//! Limits are raised in this process before spawning; children inherit
//! them. Raising limits can fail in restricted environments, which is
//! logged and tolerated — the evaluator then simply runs with whatever
//! the environment grants.

use nix::sys::resource::{Resource, setrlimit};
use tracing::{debug, warn};

pub const STACK_LIMIT_DEFAULT: u64 = 16 * 1024 * 1024;
pub const STACK_LIMIT_LARGE: u64 = 32 * 1024 * 1024;
pub const ADDRESS_SPACE_LIMIT: u64 = 8 * 1024 * 1024 * 1024;

/// Raise the stack-size rlimit to `stack_bytes` and, when requested, the
/// address-space rlimit to 8 GiB.
pub fn raise_limits(stack_bytes: u64, limit_address_space: bool) {
    match setrlimit(Resource::RLIMIT_STACK, stack_bytes, stack_bytes) {
        Ok(()) => debug!(bytes = stack_bytes, "raised stack rlimit"),
        Err(err) => warn!("failed to raise stack rlimit to {stack_bytes}: {err}"),
    }
    if limit_address_space {
        match setrlimit(
            Resource::RLIMIT_AS,
            ADDRESS_SPACE_LIMIT,
            ADDRESS_SPACE_LIMIT,
        ) {
            Ok(()) => debug!(bytes = ADDRESS_SPACE_LIMIT, "set address-space rlimit"),
            Err(err) => warn!("failed to set address-space rlimit: {err}"),
        }
    }
}
