use serde::{Deserialize, Serialize};

use crate::config::SandboxImages;

/// Languages accepted for submissions. Adding a language means adding a
/// variant here plus its wrapper template below.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Java,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Java => "java",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "python" => Some(Self::Python),
            "javascript" => Some(Self::Javascript),
            "java" => Some(Self::Java),
            _ => None,
        }
    }
}

/// A ready-to-execute unit produced by a language adapter: source files to
/// materialize in the sandbox working directory plus the command that runs
/// them inside the configured image.
#[derive(Debug, Clone)]
pub struct ProgramArtifact {
    pub files: Vec<(String, String)>,
    pub command: Vec<String>,
    pub image: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("empty source code")]
    EmptySource,
}

impl Language {
    /// Wraps user source into a self-contained program. The wrapper reads the
    /// test-case input from stdin, invokes the user-defined `solution` entry
    /// point, and prints exactly one result line (see [`WrapperVerdict`]) as
    /// the final line of stdout, whatever else the user code prints.
    pub fn prepare(
        &self,
        code: &str,
        images: &SandboxImages,
    ) -> Result<ProgramArtifact, PrepareError> {
        if code.trim().is_empty() {
            return Err(PrepareError::EmptySource);
        }

        let artifact = match self {
            Self::Python => ProgramArtifact {
                files: Vec::new(),
                command: vec![
                    "python".to_string(),
                    "-c".to_string(),
                    python_wrapper(code),
                ],
                image: images.python.clone(),
            },
            Self::Javascript => ProgramArtifact {
                files: Vec::new(),
                command: vec!["node".to_string(), "-e".to_string(), javascript_wrapper(code)],
                image: images.javascript.clone(),
            },
            Self::Java => ProgramArtifact {
                files: vec![("Main.java".to_string(), java_wrapper(code))],
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    // A javac failure is a language-level fault, not a crash:
                    // report it through the result-line protocol and exit 0.
                    concat!(
                        "if javac Main.java >compile.log 2>&1; then exec java Main; ",
                        "else cat compile.log >&2; ",
                        r#"echo '{"status":"compile_error","output":null,"error":null}'; fi"#
                    )
                    .to_string(),
                ],
                image: images.java.clone(),
            },
        };

        Ok(artifact)
    }
}

/// The single machine-parseable result line every wrapper emits as its last
/// line of stdout. `memory_kb` is the wrapper's own peak-RSS reading where the
/// runtime exposes one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WrapperVerdict {
    pub status: WrapperStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub memory_kb: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WrapperStatus {
    Ok,
    RuntimeError,
    CompileError,
}

impl WrapperVerdict {
    /// Finds the judged result among whatever the program printed. The
    /// wrapper emits its line last, so the scan runs from the end; stray user
    /// output that happens to be JSON but not a result object is skipped.
    pub fn from_stdout(stdout: &str) -> Option<Self> {
        stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<Self>(line.trim()).ok())
    }
}

/// User code is embedded as a JSON string literal, which both Python and
/// JavaScript accept verbatim, so arbitrary quoting in submissions cannot
/// break out of the wrapper.
fn python_wrapper(code: &str) -> String {
    let source_literal = serde_json::to_string(code).expect("string serialization is infallible");
    format!(
        r#"
import json, resource, sys, traceback

SOURCE = {source_literal}

def __emit(status, output, error):
    peak_kb = resource.getrusage(resource.RUSAGE_SELF).ru_maxrss
    sys.stdout.write("\n" + json.dumps({{
        "status": status, "output": output, "error": error, "memory_kb": peak_kb,
    }}) + "\n")
    sys.stdout.flush()

raw = sys.stdin.read()
try:
    arg = json.loads(raw)
except ValueError:
    arg = raw

try:
    compiled = compile(SOURCE, "<submission>", "exec")
except SyntaxError:
    __emit("compile_error", None, traceback.format_exc())
    sys.exit(0)

scope = {{}}
try:
    exec(compiled, scope)
    if "solution" not in scope:
        raise NameError("no function named 'solution' was defined")
    result = scope["solution"](arg)
    __emit("ok", "" if result is None else str(result), None)
except Exception:
    __emit("runtime_error", None, traceback.format_exc())
"#
    )
}

fn javascript_wrapper(code: &str) -> String {
    let body_literal = serde_json::to_string(&format!(
        "{code}\n;return typeof solution === \"function\" ? solution : null;"
    ))
    .expect("string serialization is infallible");
    format!(
        r#"
const fs = require("fs");

function emit(status, output, error) {{
    const peakKb = Math.round(process.memoryUsage().rss / 1024);
    process.stdout.write("\n" + JSON.stringify({{
        status: status, output: output, error: error, memory_kb: peakKb,
    }}) + "\n");
}}

const raw = fs.readFileSync(0, "utf8");
let arg;
try {{ arg = JSON.parse(raw); }} catch (_) {{ arg = raw; }}

let factory;
try {{
    factory = new Function({body_literal});
}} catch (err) {{
    emit("compile_error", null, String((err && err.stack) || err));
    process.exit(0);
}}

try {{
    const solution = factory();
    if (!solution) throw new Error("no function named 'solution' was defined");
    const result = solution(arg);
    emit("ok", result === undefined || result === null ? "" : String(result), null);
}} catch (err) {{
    emit("runtime_error", null, String((err && err.stack) || err));
}}
"#
    )
}

/// Java submissions follow the template contract: a non-public `class
/// Solution` with a `solution` method. The generated `Main` finds the method
/// reflectively so both `solution()` and `solution(String input)` work.
fn java_wrapper(code: &str) -> String {
    format!(
        r#"import java.io.PrintWriter;
import java.io.StringWriter;
import java.nio.charset.StandardCharsets;

public class Main {{
    public static void main(String[] args) {{
        String input;
        try {{
            input = new String(System.in.readAllBytes(), StandardCharsets.UTF_8);
        }} catch (Exception e) {{
            emit("runtime_error", null, "failed to read input: " + e);
            return;
        }}
        try {{
            java.lang.reflect.Method target = null;
            for (java.lang.reflect.Method m : Solution.class.getDeclaredMethods()) {{
                if (m.getName().equals("solution")) {{ target = m; break; }}
            }}
            if (target == null) {{
                throw new NoSuchMethodException("no method named 'solution' was defined");
            }}
            target.setAccessible(true);
            Object self = java.lang.reflect.Modifier.isStatic(target.getModifiers())
                    ? null
                    : Solution.class.getDeclaredConstructor().newInstance();
            Object result = target.getParameterCount() == 1
                    ? target.invoke(self, input)
                    : target.invoke(self);
            emit("ok", result == null ? "" : String.valueOf(result), null);
        }} catch (Throwable t) {{
            Throwable cause = t instanceof java.lang.reflect.InvocationTargetException
                    ? t.getCause()
                    : t;
            StringWriter trace = new StringWriter();
            cause.printStackTrace(new PrintWriter(trace));
            emit("runtime_error", null, trace.toString());
        }}
    }}

    static void emit(String status, String output, String error) {{
        long peakKb = (Runtime.getRuntime().totalMemory() - Runtime.getRuntime().freeMemory()) / 1024;
        StringBuilder sb = new StringBuilder();
        sb.append("\n{{\"status\":\"").append(status).append("\",\"output\":");
        sb.append(jsonString(output));
        sb.append(",\"error\":").append(jsonString(error));
        sb.append(",\"memory_kb\":").append(peakKb).append("}}");
        System.out.println(sb.toString());
        System.out.flush();
    }}

    static String jsonString(String s) {{
        if (s == null) return "null";
        StringBuilder sb = new StringBuilder("\"");
        for (int i = 0; i < s.length(); i++) {{
            char c = s.charAt(i);
            switch (c) {{
                case '"': sb.append("\\\""); break;
                case '\\': sb.append("\\\\"); break;
                case '\n': sb.append("\\n"); break;
                case '\r': sb.append("\\r"); break;
                case '\t': sb.append("\\t"); break;
                default:
                    if (c < 0x20) {{
                        sb.append(String.format("\\u%04x", (int) c));
                    }} else {{
                        sb.append(c);
                    }}
            }}
        }}
        return sb.append('"').toString();
    }}
}}

{code}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn images() -> SandboxImages {
        SandboxImages::default()
    }

    #[test]
    fn test_language_names_round_trip() {
        for lang in [Language::Python, Language::Javascript, Language::Java] {
            assert_eq!(Language::from_name(lang.as_str()), Some(lang));
        }
        assert_eq!(Language::from_name("cobol"), None);
    }

    #[test]
    fn test_python_artifact_embeds_code_as_literal() {
        let code = "def solution(x):\n    return \"quoted \\\" text\"";
        let artifact = Language::Python.prepare(code, &images()).unwrap();
        assert_eq!(artifact.command[0], "python");
        assert_eq!(artifact.image, "python:3.11-alpine");
        // Embedded as a JSON string literal, not spliced in raw.
        assert!(artifact.command[2].contains(&serde_json::to_string(code).unwrap()));
        assert!(artifact.files.is_empty());
    }

    #[test]
    fn test_javascript_artifact_wraps_solution_lookup() {
        let artifact = Language::Javascript
            .prepare("function solution(x) { return x + 1; }", &images())
            .unwrap();
        assert_eq!(artifact.command[0], "node");
        assert!(artifact.command[2].contains("new Function"));
    }

    #[test]
    fn test_java_artifact_carries_source_file() {
        let artifact = Language::Java
            .prepare("class Solution { String solution(String in) { return in; } }", &images())
            .unwrap();
        assert_eq!(artifact.files.len(), 1);
        assert_eq!(artifact.files[0].0, "Main.java");
        assert!(artifact.files[0].1.contains("class Solution"));
        assert!(artifact.command[2].contains("javac Main.java"));
    }

    #[test]
    fn test_empty_source_is_rejected() {
        assert!(matches!(
            Language::Python.prepare("   \n", &images()),
            Err(PrepareError::EmptySource)
        ));
    }

    #[test]
    fn test_result_line_parsed_from_noisy_stdout() {
        let stdout = concat!(
            "debug print from user code\n",
            "{\"not\": \"a result\"}\n",
            "\n",
            "{\"status\":\"ok\",\"output\":\"42\",\"error\":null,\"memory_kb\":1024}\n",
        );
        let verdict = WrapperVerdict::from_stdout(stdout).unwrap();
        assert_eq!(verdict.status, WrapperStatus::Ok);
        assert_eq!(verdict.output.as_deref(), Some("42"));
        assert_eq!(verdict.memory_kb, Some(1024));
    }

    #[test]
    fn test_missing_result_line_is_none() {
        assert_eq!(WrapperVerdict::from_stdout("just some text\n"), None);
    }
}
