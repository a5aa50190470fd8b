// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Executing the target command with the shim preloaded, once the
//! session hand-off region (C4) has been published. Mirrors the
//! `LD_PRELOAD="..." <exec>` line `client/usbnet.cpp` builds for
//! `system()`, run here as an inherited-stdio child instead so the exit
//! code is recovered directly rather than parsed back out of a shell
//! wait status.

use std::path::Path;
use std::process::{Command, ExitStatus};

use crate::error::ClientError;

/// Run `command` (its first element the program, the rest its argv) with
/// `preload` injected via the platform's dynamic-linker preload variable.
/// Both `LD_PRELOAD` (Linux/BSD) and `DYLD_INSERT_LIBRARIES` (macOS) are
/// set unconditionally; the loader that doesn't apply to the host
/// platform simply ignores the variable it doesn't recognise.
pub fn run_with_preload(command: &[String], preload: &Path) -> Result<ExitStatus, ClientError> {
    let (program, args) = command.split_first().ok_or(ClientError::NoCommand)?;

    let preload_str = preload.to_string_lossy();
    Command::new(program)
        .args(args)
        .env("LD_PRELOAD", preload_str.as_ref())
        .env("DYLD_INSERT_LIBRARIES", preload_str.as_ref())
        .status()
        .map_err(ClientError::Spawn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected_before_spawning() {
        let err = run_with_preload(&[], Path::new("/nonexistent.so")).unwrap_err();
        assert!(matches!(err, ClientError::NoCommand));
    }

    #[test]
    fn runs_the_program_with_the_preload_env_vars_set() {
        let command = vec!["sh".to_string(), "-c".to_string(), "[ \"$LD_PRELOAD\" = /tmp/libusbnet.so ]".to_string()];
        let status = run_with_preload(&command, Path::new("/tmp/libusbnet.so")).unwrap();
        assert!(status.success());
    }

    #[test]
    fn propagates_the_child_exit_code() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()];
        let status = run_with_preload(&command, Path::new("/tmp/libusbnet.so")).unwrap();
        assert_eq!(status.code(), Some(7));
    }

    #[test]
    fn an_unresolvable_program_fails_to_spawn() {
        let command = vec!["usbnet-client-test-no-such-program".to_string()];
        let err = run_with_preload(&command, Path::new("/tmp/libusbnet.so")).unwrap_err();
        assert!(matches!(err, ClientError::Spawn(_)));
    }
}
