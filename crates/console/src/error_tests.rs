// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    bad_credentials = { PluginError::TargetEndpointBadCredentials, ConsoleError::BadCredentials },
    unreachable = { PluginError::TargetEndpointUnreachable, ConsoleError::Unreachable },
    not_implemented = { PluginError::NotImplemented, ConsoleError::Misconfigured },
    not_found = { PluginError::NotFound, ConsoleError::Misconfigured },
    other = { PluginError::Other("boom".into()), ConsoleError::Unknown },
)]
fn plugin_error_maps_to_console_error(plugin_err: PluginError, expected: ConsoleError) {
    assert_eq!(ConsoleError::from(&plugin_err), expected);
}

#[test]
fn console_error_as_str_matches_wire_tags() {
    assert_eq!(ConsoleError::BadCredentials.as_str(), "badcredentials");
    assert_eq!(ConsoleError::Unreachable.as_str(), "unreachable");
    assert_eq!(ConsoleError::Misconfigured.as_str(), "misconfigured");
    assert_eq!(ConsoleError::Unknown.as_str(), "unknown");
}

#[test]
fn only_misconfigured_is_terminal() {
    assert!(ConsoleError::Misconfigured.is_terminal());
    assert!(!ConsoleError::BadCredentials.is_terminal());
    assert!(!ConsoleError::Unreachable.is_terminal());
    assert!(!ConsoleError::Unknown.is_terminal());
}

#[test]
fn display_impls_are_lowercase_tags() {
    assert_eq!(ConsoleError::Unknown.to_string(), "unknown");
    assert!(PluginError::TargetEndpointUnreachable.to_string().contains("unreachable"));
}
