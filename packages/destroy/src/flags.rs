// ABOUTME: Flags passed to the destroy command that runs inside the remote build
// ABOUTME: Derived deterministically from the caller's destroy options

/// Options the operator passed to the destroy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub manifest_path: Option<String>,
    pub destroy_volumes: bool,
    pub force_destroy: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn is_shell_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=@+,".contains(c))
}

/// Double-quote a value for a POSIX shell
fn double_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn shell_word(value: &str) -> String {
    if is_shell_safe(value) {
        value.to_string()
    } else {
        double_quote(value)
    }
}

/// Flags in a fixed order: name, namespace, file, volumes, force-destroy.
/// Equal options always produce identical output.
pub fn destroy_flags(opts: &DestroyOptions) -> Vec<String> {
    let mut flags = Vec::new();

    if let Some(name) = non_empty(&opts.name) {
        flags.push(format!("--name {}", double_quote(name)));
    }

    if let Some(namespace) = non_empty(&opts.namespace) {
        flags.push(format!("--namespace {}", shell_word(namespace)));
    }

    if let Some(manifest_path) = non_empty(&opts.manifest_path) {
        flags.push(format!("--file {}", shell_word(manifest_path)));
    }

    if opts.destroy_volumes {
        flags.push("--volumes".to_string());
    }

    if opts.force_destroy {
        flags.push("--force-destroy".to_string());
    }

    flags
}
