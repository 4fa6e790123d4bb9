// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use yare::parameterized;

#[parameterized(
    owner = { "owner", Role::Owner },
    collaborator = { "collaborator", Role::Collaborator },
    observer = { "observer", Role::Observer },
    supervisor = { "supervisor", Role::Supervisor },
    agent = { "agent", Role::Agent },
)]
fn role_round_trip(wire: &str, role: Role) {
    assert_eq!(Role::parse(wire), Some(role));
    assert_eq!(role.as_str(), wire);
}

#[test]
fn unknown_role_rejected() {
    assert_eq!(Role::parse("admin"), None);
    assert_eq!(Role::parse(""), None);
    assert_eq!(Role::parse("Owner"), None);
}

#[test]
fn observer_is_read_only() {
    assert!(!Role::Observer.can_restructure());
    assert!(!Role::Observer.can_write_terminal());
    assert!(Role::Owner.can_restructure());
    assert!(Role::Collaborator.can_write_terminal());
    assert!(Role::Agent.can_restructure());
}

#[test]
fn only_supervisor_overrides() {
    assert!(Role::Supervisor.is_supervisor());
    assert!(!Role::Owner.is_supervisor());
    assert!(!Role::Agent.is_supervisor());
}
