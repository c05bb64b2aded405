use std::num::TryFromIntError;

use libseccomp::{
    ScmpAction, ScmpArch, ScmpArgCompare, ScmpCompareOp, ScmpFilterContext, ScmpSyscall,
};
use oci_spec::runtime::{
    Arch, LinuxSeccomp, LinuxSeccompAction, LinuxSeccompArg, LinuxSeccompFilterFlag,
    LinuxSeccompOperator,
};

#[derive(Debug, thiserror::Error)]
pub enum SeccompError {
    #[error("failed to translate trace action due to failed to convert errno {errno} into i16")]
    TraceAction { source: TryFromIntError, errno: i32 },
    #[error("errno {errno} does not fit into i32")]
    InvalidErrno { source: TryFromIntError, errno: u32 },
    #[error("SCMP_ACT_NOTIFY is not supported")]
    NotifyUnsupported,
    #[error("seccomp rule with action {action:?} has no syscall names")]
    EmptyNames { action: LinuxSeccompAction },
    #[error("unknown syscall {name}")]
    UnknownSyscall {
        name: String,
        source: libseccomp::error::SeccompError,
    },
    #[error("failed to add arch to seccomp")]
    AddArch {
        source: libseccomp::error::SeccompError,
        arch: Arch,
    },
    #[error("failed to load seccomp context")]
    LoadContext {
        source: libseccomp::error::SeccompError,
    },
    #[error("failed to add rule to seccomp")]
    AddRule {
        source: libseccomp::error::SeccompError,
    },
    #[error("failed to create new seccomp filter")]
    NewFilter {
        source: libseccomp::error::SeccompError,
        default: LinuxSeccompAction,
    },
    #[error("failed to set filter flag")]
    SetFilterFlag {
        source: libseccomp::error::SeccompError,
        flag: LinuxSeccompFilterFlag,
    },
    #[error("failed to set SCMP_FLTATR_CTL_NNP")]
    SetCtlNnp {
        source: libseccomp::error::SeccompError,
    },
}

type Result<T> = std::result::Result<T, SeccompError>;

fn translate_arch(arch: Arch) -> ScmpArch {
    match arch {
        Arch::ScmpArchNative => ScmpArch::Native,
        Arch::ScmpArchX86 => ScmpArch::X86,
        Arch::ScmpArchX86_64 => ScmpArch::X8664,
        Arch::ScmpArchX32 => ScmpArch::X32,
        Arch::ScmpArchArm => ScmpArch::Arm,
        Arch::ScmpArchAarch64 => ScmpArch::Aarch64,
        Arch::ScmpArchMips => ScmpArch::Mips,
        Arch::ScmpArchMips64 => ScmpArch::Mips64,
        Arch::ScmpArchMips64n32 => ScmpArch::Mips64N32,
        Arch::ScmpArchMipsel => ScmpArch::Mipsel,
        Arch::ScmpArchMipsel64 => ScmpArch::Mipsel64,
        Arch::ScmpArchMipsel64n32 => ScmpArch::Mipsel64N32,
        Arch::ScmpArchPpc => ScmpArch::Ppc,
        Arch::ScmpArchPpc64 => ScmpArch::Ppc64,
        Arch::ScmpArchPpc64le => ScmpArch::Ppc64Le,
        Arch::ScmpArchS390 => ScmpArch::S390,
        Arch::ScmpArchS390x => ScmpArch::S390X,
    }
}

/// Errno carrying actions return `errno`, falling back to EPERM
fn translate_action(action: LinuxSeccompAction, errno: Option<u32>) -> Result<ScmpAction> {
    tracing::trace!(?action, ?errno, "translating action");
    let errno = match errno {
        Some(errno) => i32::try_from(errno)
            .map_err(|err| SeccompError::InvalidErrno { source: err, errno })?,
        None => libc::EPERM,
    };
    let action = match action {
        LinuxSeccompAction::ScmpActKill => ScmpAction::KillThread,
        LinuxSeccompAction::ScmpActTrap => ScmpAction::Trap,
        LinuxSeccompAction::ScmpActErrno => ScmpAction::Errno(errno),
        LinuxSeccompAction::ScmpActTrace => ScmpAction::Trace(
            errno
                .try_into()
                .map_err(|err| SeccompError::TraceAction { source: err, errno })?,
        ),
        LinuxSeccompAction::ScmpActAllow => ScmpAction::Allow,
        LinuxSeccompAction::ScmpActKillProcess => ScmpAction::KillProcess,
        LinuxSeccompAction::ScmpActNotify => return Err(SeccompError::NotifyUnsupported),
        LinuxSeccompAction::ScmpActLog => ScmpAction::Log,
    };

    tracing::trace!(?action, "translated action");
    Ok(action)
}

fn translate_op(op: LinuxSeccompOperator, datum_b: Option<u64>) -> ScmpCompareOp {
    match op {
        LinuxSeccompOperator::ScmpCmpNe => ScmpCompareOp::NotEqual,
        LinuxSeccompOperator::ScmpCmpLt => ScmpCompareOp::Less,
        LinuxSeccompOperator::ScmpCmpLe => ScmpCompareOp::LessOrEqual,
        LinuxSeccompOperator::ScmpCmpEq => ScmpCompareOp::Equal,
        LinuxSeccompOperator::ScmpCmpGe => ScmpCompareOp::GreaterEqual,
        LinuxSeccompOperator::ScmpCmpGt => ScmpCompareOp::Greater,
        LinuxSeccompOperator::ScmpCmpMaskedEq => ScmpCompareOp::MaskedEqual(datum_b.unwrap_or(0)),
    }
}

/// Groups the comparisons of one rule. All of them have to match, so they go
/// into a single rule, unless an argument is compared more than once. libseccomp
/// can't express that, and each comparison then becomes a rule of its own.
fn arg_comparisons(args: &[LinuxSeccompArg]) -> Vec<Vec<ScmpArgCompare>> {
    let comparisons = args
        .iter()
        .map(|arg| {
            ScmpArgCompare::new(
                arg.index() as u32,
                translate_op(arg.op(), arg.value_two()),
                arg.value(),
            )
        })
        .collect::<Vec<_>>();

    let mut indices = args.iter().map(|arg| arg.index()).collect::<Vec<_>>();
    indices.sort_unstable();
    indices.dedup();
    if indices.len() == args.len() {
        vec![comparisons]
    } else {
        tracing::warn!("an argument is compared more than once, any one comparison matches");
        comparisons.into_iter().map(|cmp| vec![cmp]).collect()
    }
}

/// Rejects profiles that can't be turned into a complete filter. There is no
/// notify listener, so any notify action would leave the workload hanging.
pub fn check_seccomp(seccomp: &LinuxSeccomp) -> Result<()> {
    if seccomp.default_action() == LinuxSeccompAction::ScmpActNotify {
        return Err(SeccompError::NotifyUnsupported);
    }

    for syscall in seccomp.syscalls().iter().flatten() {
        if syscall.action() == LinuxSeccompAction::ScmpActNotify {
            return Err(SeccompError::NotifyUnsupported);
        }
        if syscall.names().is_empty() {
            return Err(SeccompError::EmptyNames {
                action: syscall.action(),
            });
        }
    }

    Ok(())
}

/// A compiled filter which has not been loaded into the kernel yet
pub struct SeccompFilter {
    ctx: ScmpFilterContext,
}

impl SeccompFilter {
    pub fn is_valid(&self) -> bool {
        self.ctx.get_act_default().is_ok()
    }

    /// Loads the filter into the kernel for the calling thread
    pub fn load(&self) -> Result<()> {
        // In order to use the SECCOMP_SET_MODE_FILTER operation, either the calling
        // thread must have the CAP_SYS_ADMIN capability in its user namespace, or
        // the thread must already have the no_new_privs bit set.
        // Ref: https://man7.org/linux/man-pages/man2/seccomp.2.html
        self.ctx
            .load()
            .map_err(|err| SeccompError::LoadContext { source: err })
    }
}

/// Builds the filter for a profile. Fails closed: any rule that can't be
/// translated fails the whole profile.
#[tracing::instrument(level = "trace", skip(seccomp))]
pub fn compile(seccomp: &LinuxSeccomp) -> Result<SeccompFilter> {
    check_seccomp(seccomp)?;

    tracing::trace!(default_action = ?seccomp.default_action(), errno = ?seccomp.default_errno_ret(), "initializing seccomp");
    let default_action = translate_action(seccomp.default_action(), seccomp.default_errno_ret())?;
    let mut ctx =
        ScmpFilterContext::new_filter(default_action).map_err(|err| SeccompError::NewFilter {
            source: err,
            default: seccomp.default_action(),
        })?;

    if let Some(flags) = seccomp.flags() {
        for flag in flags {
            match flag {
                LinuxSeccompFilterFlag::SeccompFilterFlagLog => ctx.set_ctl_log(true),
                LinuxSeccompFilterFlag::SeccompFilterFlagTsync => ctx.set_ctl_tsync(true),
                LinuxSeccompFilterFlag::SeccompFilterFlagSpecAllow => ctx.set_ctl_ssb(true),
            }
            .map_err(|err| SeccompError::SetFilterFlag {
                source: err,
                flag: *flag,
            })?;
        }
    }

    if let Some(architectures) = seccomp.architectures() {
        for &arch in architectures {
            tracing::trace!(?arch, "adding architecture");
            ctx.add_arch(translate_arch(arch))
                .map_err(|err| SeccompError::AddArch { source: err, arch })?;
        }
    }

    // no_new_privs is its own init step and has already been applied or
    // deliberately skipped. Loading must not set it behind our back.
    ctx.set_ctl_nnp(false)
        .map_err(|err| SeccompError::SetCtlNnp { source: err })?;

    for syscall in seccomp.syscalls().iter().flatten() {
        let errno = syscall.errno_ret().or(seccomp.default_errno_ret());
        let action = translate_action(syscall.action(), errno)?;

        // names are resolved even for rules that end up skipped
        let resolved = syscall
            .names()
            .iter()
            .map(|name| {
                ScmpSyscall::from_name(name)
                    .map(|sc| (name, sc))
                    .map_err(|err| {
                        tracing::error!(?name, "failed to resolve syscall");
                        SeccompError::UnknownSyscall {
                            name: name.to_owned(),
                            source: err,
                        }
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        if action == default_action {
            // When the action is the same as the default action, the rule is redundant. We can
            // skip this here to avoid failing when we add the rules.
            tracing::warn!(
                "detect a seccomp action that is the same as the default action: {:?}",
                syscall
            );
            continue;
        }

        for (name, sc) in resolved {
            match syscall.args() {
                Some(args) if !args.is_empty() => {
                    for cmps in arg_comparisons(args) {
                        tracing::trace!(?name, ?action, ?cmps, "add seccomp conditional rule");
                        ctx.add_rule_conditional(action, sc, &cmps)
                            .map_err(|err| {
                                tracing::error!(
                                    "failed to add seccomp action: {:?}. Cmps: {:?} Syscall: {name}", &action, cmps,
                                );
                                SeccompError::AddRule {
                                    source: err,
                                }
                            })?;
                    }
                }
                _ => {
                    tracing::trace!(?name, ?action, "add seccomp rule");
                    ctx.add_rule(action, sc).map_err(|err| {
                        tracing::error!("failed to add seccomp rule: {:?}. Syscall: {name}", &sc);
                        SeccompError::AddRule { source: err }
                    })?;
                }
            }
        }
    }

    Ok(SeccompFilter { ctx })
}

/// Compiles and loads the profile
pub fn initialize_seccomp(seccomp: &LinuxSeccomp) -> Result<()> {
    compile(seccomp)?.load()
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use oci_spec::runtime::{LinuxSeccompArgBuilder, LinuxSeccompBuilder, LinuxSyscallBuilder};

    use super::*;

    type Rule<'a> = (Vec<&'a str>, LinuxSeccompAction, Option<u32>);

    fn profile(default_action: LinuxSeccompAction, syscalls: Vec<Rule>) -> LinuxSeccomp {
        let syscalls = syscalls
            .into_iter()
            .map(|(names, action, errno)| {
                let mut builder = LinuxSyscallBuilder::default()
                    .names(names.into_iter().map(String::from).collect::<Vec<_>>())
                    .action(action);
                if let Some(errno) = errno {
                    builder = builder.errno_ret(errno);
                }
                builder.build().unwrap()
            })
            .collect::<Vec<_>>();

        LinuxSeccompBuilder::default()
            .default_action(default_action)
            .architectures(vec![Arch::ScmpArchNative])
            .syscalls(syscalls)
            .build()
            .unwrap()
    }

    #[test]
    fn test_compile_valid_profile() -> Result<()> {
        let seccomp = profile(
            LinuxSeccompAction::ScmpActAllow,
            vec![(vec!["getcwd", "chmod"], LinuxSeccompAction::ScmpActErrno, None)],
        );
        let filter = compile(&seccomp)?;
        assert!(filter.is_valid());
        Ok(())
    }

    #[test]
    fn test_compile_with_default_errno() -> Result<()> {
        let mut seccomp = profile(
            LinuxSeccompAction::ScmpActErrno,
            vec![(vec!["read", "write"], LinuxSeccompAction::ScmpActAllow, None)],
        );
        seccomp.set_default_errno_ret(Some(libc::ENOSYS as u32));
        assert!(compile(&seccomp)?.is_valid());
        Ok(())
    }

    #[test]
    fn test_rule_errno_overrides_default() -> Result<()> {
        let seccomp = profile(
            LinuxSeccompAction::ScmpActAllow,
            vec![(vec!["mkdir"], LinuxSeccompAction::ScmpActErrno, Some(libc::EACCES as u32))],
        );
        let rule = &seccomp.syscalls().as_ref().unwrap()[0];
        let action = translate_action(
            rule.action(),
            rule.errno_ret().or(seccomp.default_errno_ret()),
        )?;
        assert_eq!(action, ScmpAction::Errno(libc::EACCES));

        let action = translate_action(LinuxSeccompAction::ScmpActErrno, None)?;
        assert_eq!(action, ScmpAction::Errno(libc::EPERM));
        assert!(compile(&seccomp)?.is_valid());
        Ok(())
    }

    #[test]
    fn test_empty_names_fails() {
        let seccomp = profile(
            LinuxSeccompAction::ScmpActAllow,
            vec![(vec![], LinuxSeccompAction::ScmpActErrno, None)],
        );
        assert!(matches!(
            compile(&seccomp),
            Err(SeccompError::EmptyNames { .. })
        ));
    }

    #[test]
    fn test_unknown_syscall_fails() {
        let seccomp = profile(
            LinuxSeccompAction::ScmpActAllow,
            vec![(vec!["not_a_syscall"], LinuxSeccompAction::ScmpActErrno, None)],
        );
        assert!(matches!(
            compile(&seccomp),
            Err(SeccompError::UnknownSyscall { .. })
        ));
    }

    #[test]
    fn test_notify_is_rejected() {
        let seccomp = profile(LinuxSeccompAction::ScmpActNotify, vec![]);
        assert!(matches!(
            compile(&seccomp),
            Err(SeccompError::NotifyUnsupported)
        ));

        let seccomp = profile(
            LinuxSeccompAction::ScmpActAllow,
            vec![(vec!["getpid"], LinuxSeccompAction::ScmpActNotify, None)],
        );
        assert!(matches!(
            compile(&seccomp),
            Err(SeccompError::NotifyUnsupported)
        ));
    }

    #[test]
    fn test_unknown_default_action_fails_to_decode() {
        let profile = r#"{ "defaultAction": "SCMP_ACT_BOGUS", "syscalls": [] }"#;
        assert!(serde_json::from_str::<LinuxSeccomp>(profile).is_err());
    }

    #[test]
    fn test_unknown_syscall_in_redundant_rule_fails() {
        let seccomp = profile(
            LinuxSeccompAction::ScmpActAllow,
            vec![(vec!["getpid", "not_a_syscall"], LinuxSeccompAction::ScmpActAllow, None)],
        );
        assert!(matches!(
            compile(&seccomp),
            Err(SeccompError::UnknownSyscall { name, .. }) if name == "not_a_syscall"
        ));
    }

    #[test]
    fn test_errno_out_of_range_fails() {
        assert!(matches!(
            translate_action(LinuxSeccompAction::ScmpActErrno, Some(u32::MAX)),
            Err(SeccompError::InvalidErrno { errno: u32::MAX, .. })
        ));

        let seccomp = profile(
            LinuxSeccompAction::ScmpActAllow,
            vec![(vec!["mkdir"], LinuxSeccompAction::ScmpActErrno, Some(u32::MAX))],
        );
        assert!(matches!(
            compile(&seccomp),
            Err(SeccompError::InvalidErrno { .. })
        ));
    }

    fn arg(index: usize, value: u64, op: LinuxSeccompOperator) -> LinuxSeccompArg {
        LinuxSeccompArgBuilder::default()
            .index(index)
            .value(value)
            .op(op)
            .build()
            .unwrap()
    }

    #[test]
    fn test_arg_comparisons_share_one_rule() -> Result<()> {
        let args = vec![
            arg(0, 1, LinuxSeccompOperator::ScmpCmpEq),
            arg(1, 2, LinuxSeccompOperator::ScmpCmpNe),
        ];
        let rules = arg_comparisons(&args);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].len(), 2);

        let mut seccomp = profile(LinuxSeccompAction::ScmpActAllow, vec![]);
        seccomp.set_syscalls(Some(vec![LinuxSyscallBuilder::default()
            .names(vec!["personality".to_owned()])
            .action(LinuxSeccompAction::ScmpActErrno)
            .args(args)
            .build()?]));
        assert!(compile(&seccomp)?.is_valid());
        Ok(())
    }

    #[test]
    fn test_repeated_arg_splits_rules() -> Result<()> {
        let args = vec![
            arg(0, 0, LinuxSeccompOperator::ScmpCmpEq),
            arg(0, 8, LinuxSeccompOperator::ScmpCmpEq),
        ];
        let rules = arg_comparisons(&args);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|cmps| cmps.len() == 1));

        let mut seccomp = profile(LinuxSeccompAction::ScmpActAllow, vec![]);
        seccomp.set_syscalls(Some(vec![LinuxSyscallBuilder::default()
            .names(vec!["personality".to_owned()])
            .action(LinuxSeccompAction::ScmpActErrno)
            .args(args)
            .build()?]));
        assert!(compile(&seccomp)?.is_valid());
        Ok(())
    }
}
