#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;

/// A fake store with three paths: `app` depends on `lib`, both depend on `libc`.
pub struct Store {
    pub temp: TempDir,
    pub libc: String,
    pub lib: String,
    pub app: String,
}

impl Store {
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    pub fn closure(&self) -> PathBuf {
        let closure = self.file("closure.json");
        let records = json!([
            {"path": self.app, "references": [self.app, self.lib, self.libc]},
            {"path": self.lib, "references": [self.libc]},
            {"path": self.libc, "references": []},
        ]);
        write_json(&closure, &records);
        closure
    }
}

pub fn prepare_store(prefix: &str) -> Store {
    let temp = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("tempdir");
    let store = temp.path().join("store");
    let mut make = |name: &str, files: &[(&str, &str)]| {
        let path = store.join(name);
        for (file, contents) in files {
            let target = path.join(file);
            fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");
            fs::write(&target, contents).expect("write");
        }
        path.to_str().expect("utf-8 temp dir").to_string()
    };
    let libc = make("aaa-libc", &[("lib/libc.so", "libc")]);
    let lib = make("bbb-lib", &[("lib/libfoo.so", "foo")]);
    let app = make("ccc-app", &[("bin/app", "#!/bin/sh\necho app\n")]);
    Store {
        temp,
        libc,
        lib,
        app,
    }
}

pub fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_vec_pretty(value).expect("json")).expect("write json");
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).expect("read json")).expect("parse json")
}

pub fn layer_paths(layers: &Value) -> Vec<Vec<String>> {
    layers
        .as_array()
        .expect("layers array")
        .iter()
        .map(|layer| {
            layer["paths"]
                .as_array()
                .expect("paths")
                .iter()
                .map(|path| path["path"].as_str().expect("path").to_string())
                .collect()
        })
        .collect()
}
