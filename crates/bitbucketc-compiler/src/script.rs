//! Step script encoding.
//!
//! A step's commands are rendered into one shell script. Each command is
//! preceded by an `echo + <command>` trace line, and the whole body is
//! wrapped in a preamble that writes the netrc file and scrubs credentials
//! from the environment. The result is base64 encoded so it survives being
//! stored in a single environment variable.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Environment variable holding the encoded script.
pub const SCRIPT_ENV: &str = "CI_SCRIPT";
/// Deprecated alias of [`SCRIPT_ENV`].
pub const SCRIPT_ENV_LEGACY: &str = "DRONE_SCRIPT";

/// Entrypoint of every script step.
pub const SCRIPT_ENTRYPOINT: [&str; 2] = ["/bin/sh", "-c"];
/// Command that decodes the script and runs it, stopping at the first failure.
pub const SCRIPT_COMMAND: &str = "echo $CI_SCRIPT | base64 -d | /bin/sh -e";

const SETUP_SCRIPT: &str = r#"
if [ -n "$CI_NETRC_MACHINE" ]; then
cat <<EOF > $HOME/.netrc
machine $CI_NETRC_MACHINE
login $CI_NETRC_USERNAME
password $CI_NETRC_PASSWORD
EOF
chmod 0600 $HOME/.netrc
fi
unset CI_NETRC_USERNAME
unset CI_NETRC_PASSWORD
unset DRONE_NETRC_USERNAME
unset DRONE_NETRC_PASSWORD
unset CI_SCRIPT
unset DRONE_SCRIPT
"#;

/// Render the commands into the plain (unencoded) step script.
pub fn render_script<S: AsRef<str>>(commands: &[S]) -> String {
    let mut script = String::from(SETUP_SCRIPT);
    for command in commands {
        let command = command.as_ref();
        // Writing to a String cannot fail.
        let _ = write!(script, "\necho + {}\n{}\n", trace_literal(command), command);
    }
    script.push('\n');
    script
}

/// Render the commands and base64 encode the script.
pub fn encode_script<S: AsRef<str>>(commands: &[S]) -> String {
    STANDARD.encode(render_script(commands))
}

/// Quote a command so `echo` prints it verbatim instead of expanding it.
fn trace_literal(command: &str) -> String {
    format!("{:?}", command)
        .replace('$', "\\$")
        .replace('`', "\\`")
}
