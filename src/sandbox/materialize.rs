// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandbox materialization.
//!
//! The stub tree under `.sandbox/` is wiped and regenerated at every
//! startup: one `<server>/<title>.cjs` stub per registered tool plus the
//! `_runner.cjs` harness the host spawns for script execution. Stubs call
//! tools by their downstream-canonical name while living at title-derived
//! paths.

use std::path::{Path, PathBuf};

use crate::error::SandboxError;
use crate::mcp::ToolDescriptor;
use crate::registry::RegisteredServer;

/// Sandbox directory, relative to the working directory.
pub const SANDBOX_DIR: &str = ".sandbox";

/// File name of the runner harness inside the sandbox root.
pub const RUNNER_FILE: &str = "_runner.cjs";

/// Wipe and regenerate the stub tree. Returns the number of stubs written.
pub fn materialize(root: &Path, servers: &[RegisteredServer]) -> Result<usize, SandboxError> {
    if root.exists() {
        std::fs::remove_dir_all(root).map_err(|e| {
            SandboxError::MaterializeFailed(format!("failed to wipe {}: {}", root.display(), e))
        })?;
    }
    std::fs::create_dir_all(root).map_err(|e| {
        SandboxError::MaterializeFailed(format!("failed to create {}: {}", root.display(), e))
    })?;

    std::fs::write(root.join(RUNNER_FILE), RUNNER_TEMPLATE)
        .map_err(|e| SandboxError::MaterializeFailed(format!("failed to write runner: {}", e)))?;

    let mut written = 0;
    for server in servers {
        let server_dir = root.join(&server.name);
        std::fs::create_dir_all(&server_dir).map_err(|e| {
            SandboxError::MaterializeFailed(format!(
                "failed to create {}: {}",
                server_dir.display(),
                e
            ))
        })?;

        for tool in &server.tools {
            let path = stub_path(root, &server.name, &tool.title);
            std::fs::write(&path, render_stub(&server.name, tool)).map_err(|e| {
                SandboxError::MaterializeFailed(format!(
                    "failed to write {}: {}",
                    path.display(),
                    e
                ))
            })?;
            written += 1;
        }
    }

    tracing::info!(stubs = written, root = %root.display(), "sandbox materialized");
    Ok(written)
}

/// Path of the stub for one tool.
pub fn stub_path(root: &Path, server: &str, title: &str) -> PathBuf {
    root.join(server).join(format!("{}.cjs", title))
}

/// Render the stub body for one tool.
pub fn render_stub(server: &str, tool: &ToolDescriptor) -> String {
    // JSON string literals double as JS string literals.
    let server_lit = serde_json::Value::String(server.to_string()).to_string();
    let name_lit = serde_json::Value::String(tool.name.clone()).to_string();

    format!(
        r#"// Generated tool stub. Regenerated at startup, do not edit.
'use strict';

const serversInfo = require('serversInfo');
const toolOutputCache = require('toolOutputCache');

module.exports = async function (args) {{
  const info = serversInfo[{server_lit}];
  if (!info) {{
    throw new Error('Server ' + {server_lit} + ' is not registered');
  }}
  if (!info.connected) {{
    throw new Error('Server ' + {server_lit} + ' has no live connection');
  }}
  const rawResponse = await __hostCall({server_lit}, {name_lit}, args === undefined ? {{}} : args);
  if (!Array.isArray(toolOutputCache[{server_lit}])) {{
    toolOutputCache[{server_lit}] = [];
  }}
  toolOutputCache[{server_lit}].push({{ toolName: {name_lit}, rawResponse: rawResponse }});
  return {{
    content: rawResponse.content !== undefined ? rawResponse.content : [],
    isError: rawResponse.isError !== undefined ? rawResponse.isError : false,
    _meta: {{ serverName: {server_lit}, toolName: {name_lit} }},
  }};
}};
"#
    )
}

/// The runner harness: reads one `run` frame from stdin, executes the
/// script inside a constrained `node:vm` context, bridges tool calls back
/// to the host as `call` frames, and finishes with a `done` or `error`
/// frame carrying the captured tool outputs.
const RUNNER_TEMPLATE: &str = r#"// Generated script runner. Regenerated at startup, do not edit.
'use strict';

const fs = require('node:fs');
const path = require('node:path');
const readline = require('node:readline');
const vm = require('node:vm');

const ROOT = __dirname;

let nextCallId = 1;
const pending = new Map();

function send(frame) {
  process.stdout.write(JSON.stringify(frame) + '\n');
}

// Exit only after the terminal frame has drained through the pipe.
function sendAndExit(frame, code) {
  process.stdout.write(JSON.stringify(frame) + '\n', function () {
    process.exit(code);
  });
}

function hostCall(server, tool, args) {
  return new Promise(function (resolve, reject) {
    const id = nextCallId++;
    pending.set(id, { resolve: resolve, reject: reject });
    send({ type: 'call', id: id, server: server, tool: tool, arguments: args });
  });
}

function buildContext(serversInfo, toolOutputCache) {
  const moduleCache = new Map();

  const sandboxConsole = {};
  ['log', 'info', 'warn', 'error', 'debug'].forEach(function (level) {
    sandboxConsole[level] = function () {
      const text = Array.prototype.map.call(arguments, String).join(' ');
      send({ type: 'log', level: level, text: text });
    };
  });

  const context = vm.createContext({
    console: sandboxConsole,
    Promise: Promise,
    JSON: JSON,
    Math: Math,
    setTimeout: setTimeout,
    clearTimeout: clearTimeout,
  });

  function resolveUnderRoot(fromDir, request) {
    let target = request;
    if (!target.endsWith('.cjs')) {
      target += '.cjs';
    }
    const resolved = path.resolve(fromDir, target);
    const rel = path.relative(ROOT, resolved);
    if (rel.startsWith('..') || path.isAbsolute(rel)) {
      throw new Error("Cannot require '" + request + "': outside the sandbox root");
    }
    return resolved;
  }

  // Stub modules receive the host bridge as a wrapper argument; it is
  // never a context global, so a top-level script can only reach it by
  // requiring a generated stub.
  function loadModule(filename) {
    if (moduleCache.has(filename)) {
      return moduleCache.get(filename).exports;
    }
    if (!fs.existsSync(filename)) {
      throw new Error("Cannot find module '" + path.relative(ROOT, filename) + "'");
    }
    const source = fs.readFileSync(filename, 'utf8');
    const mod = { exports: {} };
    moduleCache.set(filename, mod);
    const script = new vm.Script(
      '(function (module, exports, require, __hostCall) {\n' + source + '\n})',
      { filename: filename }
    );
    script.runInContext(context)(mod, mod.exports, makeRequire(path.dirname(filename)), hostCall);
    return mod.exports;
  }

  function makeRequire(fromDir) {
    return function sandboxRequire(request) {
      if (request === 'serversInfo') {
        return serversInfo;
      }
      if (request === 'toolOutputCache') {
        return toolOutputCache;
      }
      return loadModule(resolveUnderRoot(fromDir, request));
    };
  }

  return { context: context, makeRequire: makeRequire };
}

async function runScript(code, serversInfo, toolOutputCache) {
  const built = buildContext(Object.freeze(serversInfo), toolOutputCache);
  const mod = { exports: null };
  const filename = path.join(ROOT, '__script__.cjs');
  const script = new vm.Script(
    '(function (module, exports, require) {\n' + code + '\n})',
    { filename: filename }
  );
  script.runInContext(built.context)(mod, mod.exports, built.makeRequire(ROOT));

  let value = mod.exports;
  if (value && typeof value.then === 'function') {
    value = await value;
  }
  return value === undefined ? null : value;
}

function main() {
  const rl = readline.createInterface({ input: process.stdin, terminal: false });
  let started = false;

  rl.on('line', function (line) {
    const trimmed = line.trim();
    if (!trimmed) {
      return;
    }

    let frame;
    try {
      frame = JSON.parse(trimmed);
    } catch (e) {
      sendAndExit({ type: 'error', message: 'unparseable frame: ' + e.message, toolOutputs: {} }, 1);
      return;
    }

    if (frame.type === 'run' && !started) {
      started = true;
      const serversInfo = frame.serversInfo || {};
      const toolOutputCache = {};
      Object.keys(serversInfo).forEach(function (name) {
        toolOutputCache[name] = [];
      });

      runScript(frame.code, serversInfo, toolOutputCache)
        .then(function (value) {
          try {
            sendAndExit({ type: 'done', value: value, toolOutputs: toolOutputCache }, 0);
          } catch (e) {
            sendAndExit({
              type: 'error',
              message: 'exported value is not serializable: ' + e.message,
              toolOutputs: {},
            }, 0);
          }
        })
        .catch(function (e) {
          try {
            sendAndExit({
              type: 'error',
              message: e && e.message ? e.message : String(e),
              toolOutputs: toolOutputCache,
            }, 0);
          } catch (e2) {
            sendAndExit({
              type: 'error',
              message: e && e.message ? e.message : 'script failed',
              toolOutputs: {},
            }, 0);
          }
        });
    } else if (frame.type === 'result') {
      const entry = pending.get(frame.id);
      if (entry) {
        pending.delete(frame.id);
        entry.resolve(frame.response);
      }
    } else if (frame.type === 'error' && frame.id !== undefined) {
      const entry = pending.get(frame.id);
      if (entry) {
        pending.delete(frame.id);
        entry.reject(new Error(frame.message));
      }
    }
  });
}

main();
"#;
