//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Built-in locking, recovery and security demonstrations."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use fsd_api::Severity;

use super::model::{AlertSpec, Branch, Line, Scenario, Step, StepAction};

/// Prefixes of files created by scenarios; `reset` deletes anything matching.
pub const ARTIFACT_PREFIXES: [&str; 2] = ["demo-", "concurrent-"];

pub fn is_demo_artifact(name: &str) -> bool {
    ARTIFACT_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

pub fn builtin() -> Vec<Scenario> {
    vec![
        write_lock(),
        readers_writers(),
        deadlock_recovery(),
        security_violation(),
        concurrent_ops(),
        deadlock_conditions(),
    ]
}

fn narrate() -> Step {
    Step::new(StepAction::Narrate)
}

fn delay(ms: u64) -> Step {
    Step::new(StepAction::Delay { delay_ms: ms })
}

fn refresh() -> Step {
    Step::new(StepAction::Refresh {
        domains: Vec::new(),
    })
}

fn upload(file: &str, content: &str) -> Step {
    Step::new(StepAction::Upload {
        file: file.to_owned(),
        content: content.to_owned(),
    })
}

fn lines(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|text| (*text).to_owned()).collect()
}

fn write_lock() -> Scenario {
    Scenario {
        id: "write-lock".into(),
        title: "Exclusive WRITE lock".into(),
        description: "Upload a file and watch the server take fcntl(F_WRLCK) for the write.".into(),
        explanation: lines(&[
            "fcntl() with F_WRLCK acquires an exclusive write lock on a file.",
            "1. Client A starts uploading; the server calls fcntl(fd, F_SETLK, F_WRLCK).",
            "2. Lock acquired; only this process can write to the file.",
            "3. Client B uploads the same file; fcntl() fails with EACCES/EAGAIN.",
            "4. Client B is rejected; the critical section stays protected.",
            "5. Client A finishes; close(fd) releases the lock.",
            "Concepts: critical section, mutual exclusion enforced by the kernel, advisory UNIX file locks.",
        ]),
        explain_only: false,
        steps: vec![
            upload(
                "demo-write-lock.txt",
                "Demo content for WRITE lock test\nTimestamp: {timestamp}",
            )
            .before(Line::info("[STEP 1] Uploading demo-write-lock.txt..."))
            .after(Line::success("[LOCK] WRITE lock acquired on demo-write-lock.txt"))
            .after(Line::success("[UPLOAD] File uploaded successfully"))
            .after(Line::success("[STEP 2] Lock released after operation completed")),
            refresh(),
        ],
        completion_alert: None,
    }
}

fn readers_writers() -> Scenario {
    let reader = |client: &str, step: usize| Branch {
        label: format!("client-{}", client.to_ascii_lowercase()),
        steps: vec![Step::new(StepAction::Download {
            file: "demo-readers.txt".into(),
        })
        .before(Line::info(format!(
            "[STEP {step}] Client {client}: Accessing file (READ lock)..."
        )))
        .after(Line::success(format!("[LOCK] READ lock acquired by Client {client}")))],
    };
    Scenario {
        id: "readers-writers".into(),
        title: "Shared READ locks".into(),
        description: "Two clients read the same file at once; read locks are shared.".into(),
        explanation: lines(&[
            "Readers may share data; writers need exclusive access.",
            "fcntl(F_RDLCK) is a shared read lock, several may be held at once.",
            "fcntl(F_WRLCK) is an exclusive write lock and blocks every other lock.",
            "1. Client A downloads the file and holds F_RDLCK.",
            "2. Client B downloads the same file and also gets F_RDLCK.",
            "3. Client C tries to upload; F_WRLCK fails while readers are present.",
            "4. Clients A and B finish and release; Client C can now take F_WRLCK.",
            "This keeps readers from seeing a partially written file.",
        ]),
        explain_only: false,
        steps: vec![
            upload(
                "demo-readers.txt",
                "Shared read test content\nMultiple readers allowed\n{timestamp}",
            )
            .before(Line::info("[SETUP] Creating demo-readers.txt for reading..."))
            .after(Line::success("[SETUP] File created successfully")),
            Step::new(StepAction::FanOut {
                branches: vec![reader("A", 1), reader("B", 2)],
                stagger_ms: Some(500),
            })
            .after(Line::success("[SUCCESS] Both clients accessed file simultaneously!"))
            .after(Line::info(
                "[INFO] Read locks are SHARED - fcntl(F_RDLCK) allows multiple readers",
            )),
            refresh(),
        ],
        completion_alert: None,
    }
}

fn deadlock_recovery() -> Scenario {
    Scenario {
        id: "deadlock-recovery".into(),
        title: "Deadlock detection and recovery".into(),
        description: "Narrates a stalled lock holder being timed out and cleaned up.".into(),
        explanation: lines(&[
            "A deadlock is processes waiting forever on resources held by each other.",
            "Detection: a monitor thread tracks how long each operation holds its lock.",
            "Timeout: operations holding a lock past 300s are flagged.",
            "Recovery: the lock is force-released with fcntl(fd, F_SETLK, F_UNLCK).",
            "The partial file is removed with unlink() and TIMEOUT_RECOVERY is audited.",
            "Concepts: deadlock recovery, timeout detection, resource cleanup.",
        ]),
        explain_only: false,
        steps: vec![
            narrate()
                .before(Line::warning("[INFO] Deadlock Recovery Demonstration"))
                .before(Line::info("[SCENARIO] Simulating a stalled client holding a lock...")),
            delay(1_000).after(Line::info("[LOCK] WRITE lock acquired on partial-upload.txt")),
            delay(1_500).after(Line::warning("[STALL] Client connection lost... lock still held")),
            delay(1_500).after(Line::error("[TIMEOUT] Operation exceeded 300s threshold")),
            delay(1_000)
                .after(Line::warning("[RECOVERY] Timeout detected - initiating recovery..."))
                .after(Line::warning("[RECOVERY] → Releasing WRITE lock"))
                .after(Line::warning("[RECOVERY] → Deleting partial file"))
                .after(Line::warning("[RECOVERY] → Freeing resources")),
            delay(1_000)
                .after(Line::success("[SUCCESS] Deadlock recovery completed"))
                .after(Line::success("[INFO] System is now available for new operations")),
        ],
        completion_alert: Some(AlertSpec {
            kind: "TIMEOUT".into(),
            message: "Operation timeout detected and recovered".into(),
            severity: Severity::Warning,
        }),
    }
}

fn security_violation() -> Scenario {
    Scenario {
        id: "security-violation".into(),
        title: "Security violation detection".into(),
        description: "Walks through blocked path traversal and token rejection, then counts security events.".into(),
        explanation: lines(&[
            "Authentication: bearer tokens are validated by the API layer.",
            "Authorization: each user can only reach their own files.",
            "Input validation: names containing '..' or starting with '/' are refused.",
            "Audit logging: every violation is written to the security log.",
            "Each layer still protects the system if another one fails.",
        ]),
        explain_only: false,
        steps: vec![
            narrate()
                .before(Line::warning("[SECURITY] Testing security mechanisms..."))
                .before(Line::warning("[ATTEMPT] Path traversal: ../../../etc/passwd")),
            delay(800)
                .after(Line::error("[BLOCKED] Path traversal detected and blocked"))
                .after(Line::info("[SECURITY] Violation logged to security.log")),
            delay(800).after(Line::warning("[ATTEMPT] Invalid authentication token")),
            delay(800)
                .after(Line::error("[BLOCKED] Authentication failed - 401 Unauthorized"))
                .after(Line::info("[SECURITY] Failed auth attempt logged")),
            delay(1_000),
            Step::new(StepAction::FetchSecurityEvents)
                .after(Line::info("[INFO] Total security events: {count}")),
            Step::new(StepAction::RaiseAlert {
                kind: "SECURITY".into(),
                message: "Unauthorized access attempt detected".into(),
                severity: Severity::Error,
            }),
            refresh(),
        ],
        completion_alert: None,
    }
}

fn concurrent_ops() -> Scenario {
    let client = |index: usize| {
        let letter = char::from(b'A' + index as u8);
        let file = format!("concurrent-{letter}.txt");
        Branch {
            label: format!("client-{}", letter.to_ascii_lowercase()),
            steps: vec![upload(&file, &format!("Concurrent test {}\n{{timestamp}}", index + 1))
                .before(Line::info(format!("[CLIENT {letter}] Uploading {file}...")))
                .after(Line::success(format!("[SUCCESS] {file} uploaded (independent lock)")))],
        }
    };
    Scenario {
        id: "concurrent-ops".into(),
        title: "Concurrent file operations".into(),
        description: "Three clients upload different files at once; locks are per file.".into(),
        explanation: lines(&[
            "The server handles each client on its own thread via pthread_create().",
            "File-level locking gives every file an independent lock.",
            "A mutex protects the server's shared state.",
            "Different files never contend, so the uploads proceed together.",
            "A single global lock would force every client to wait in turn.",
        ]),
        explain_only: false,
        steps: vec![
            Step::new(StepAction::FanOut {
                branches: (0..3).map(client).collect(),
                stagger_ms: None,
            })
            .before(Line::info("[CONCURRENT] Starting multiple operations..."))
            .after(Line::success("[CONCURRENT] All operations completed successfully!"))
            .after(Line::info("[INFO] Each file had independent lock - no blocking"))
            .after(Line::info("[INFO] This demonstrates lock granularity at file level")),
            refresh(),
        ],
        completion_alert: None,
    }
}

fn deadlock_conditions() -> Scenario {
    Scenario {
        id: "deadlock-conditions".into(),
        title: "The four deadlock conditions".into(),
        description: "How the server breaks three of the four Coffman conditions.".into(),
        explanation: lines(&[
            "Deadlock needs all four conditions at once:",
            "1. Mutual exclusion: a resource is held by one process at a time. Required for write locks.",
            "2. Hold and wait: broken, locks are taken with non-blocking fcntl(F_SETLK).",
            "3. No preemption: broken, operations past 300s are force-released.",
            "4. Circular wait: broken, locks are always taken in the same order.",
            "Thread A locks fileX, then tries fileY; F_SETLK returns EAGAIN instead of waiting.",
            "Thread A releases fileX and retries, so Thread B can proceed.",
        ]),
        explain_only: true,
        steps: Vec::new(),
        completion_alert: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_scenarios_are_valid_and_unique() {
        let scenarios = builtin();
        assert_eq!(scenarios.len(), 6);
        let mut ids: Vec<_> = scenarios.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 6);
        for scenario in &scenarios {
            scenario.validate().unwrap();
            assert!(!scenario.explanation.is_empty(), "{} has no explanation", scenario.id);
        }
    }

    #[test]
    fn runnable_scenarios_only_create_demo_artifacts() {
        fn files(steps: &[Step], out: &mut Vec<String>) {
            for step in steps {
                match &step.action {
                    StepAction::Upload { file, .. } => out.push(file.clone()),
                    StepAction::FanOut { branches, .. } => {
                        for branch in branches {
                            files(&branch.steps, out);
                        }
                    }
                    _ => {}
                }
            }
        }
        let mut created = Vec::new();
        for scenario in builtin() {
            files(&scenario.steps, &mut created);
        }
        assert!(!created.is_empty());
        assert!(created.iter().all(|name| is_demo_artifact(name)));
        assert!(!is_demo_artifact("report.txt"));
    }

    #[test]
    fn deadlock_recovery_never_calls_the_backend() {
        let scenario = deadlock_recovery();
        assert!(scenario.steps.iter().all(|step| !step.action.touches_backend()));
        assert_eq!(scenario.completion_alert.unwrap().kind, "TIMEOUT");
    }
}
