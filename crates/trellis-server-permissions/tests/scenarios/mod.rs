// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod inheritance;
mod lifecycle;
mod resolution;
mod roles;
mod spaces;
mod support;
mod workflow;
