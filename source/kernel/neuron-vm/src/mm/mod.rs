// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table and address-space primitives backing the host HAL.

pub mod address_space;
pub mod page_table;

pub use address_space::{AddressSpace, AddressSpaceError, AddressSpaceManager, AsHandle};
pub use page_table::{MapError, PageFlags, PageTable, PAGE_SIZE};
