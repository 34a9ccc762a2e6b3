// PHI audit: static analysis tests that scan every Rust source file for
// tracing calls (qualified or bare) carrying document content or secrets. Prevents sensitive
// material from leaking into operational logs via regression.
