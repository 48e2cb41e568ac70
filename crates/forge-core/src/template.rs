//! Project template mounted into a fresh sandbox.
//!
//! A minimal Vite + React + TypeScript app. `src/main.tsx` listens for the
//! `THEME` message posted by preview surfaces and toggles a `dark` class on
//! the document root.

use forge_runtime::FileTree;

const PACKAGE_JSON: &str = r#"{
  "name": "forge-app",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite --host",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  },
  "devDependencies": {
    "@types/react": "^18.3.3",
    "@types/react-dom": "^18.3.0",
    "@vitejs/plugin-react": "^4.3.1",
    "typescript": "^5.5.3",
    "vite": "^5.4.0"
  }
}
"#;

const VITE_CONFIG: &str = r#"import { defineConfig } from "vite";
import react from "@vitejs/plugin-react";

export default defineConfig({
  plugins: [react()],
});
"#;

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Forge App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.tsx"></script>
  </body>
</html>
"#;

const MAIN_TSX: &str = r#"import React from "react";
import ReactDOM from "react-dom/client";
import App from "./App";
import "./index.css";

window.addEventListener("message", (event) => {
  if (event.data?.type === "THEME") {
    document.documentElement.classList.toggle("dark", event.data.theme === "dark");
  }
});

ReactDOM.createRoot(document.getElementById("root")!).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"#;

const INDEX_CSS: &str = r#":root {
  font-family: system-ui, sans-serif;
  color: #0f172a;
  background: #ffffff;
}

:root.dark {
  color: #e2e8f0;
  background: #0f172a;
}
"#;

const APP_TSX: &str = r#"export default function App() {
  return (
    <main style={{ display: "grid", placeItems: "center", minHeight: "100vh" }}>
      <p>Describe an app to get started.</p>
    </main>
  );
}
"#;

/// The file tree mounted on boot.
pub fn default_project() -> FileTree {
    FileTree::new()
        .with_file("package.json", PACKAGE_JSON)
        .with_file("vite.config.ts", VITE_CONFIG)
        .with_file("index.html", INDEX_HTML)
        .with_file("src/main.tsx", MAIN_TSX)
        .with_file("src/index.css", INDEX_CSS)
        .with_file("src/App.tsx", APP_TSX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_project_layout() {
        let tree = default_project();
        let paths: Vec<String> = tree.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "index.html",
                "package.json",
                "src/App.tsx",
                "src/index.css",
                "src/main.tsx",
                "vite.config.ts",
            ]
        );
    }

    #[test]
    fn test_package_json_has_dev_script() {
        let tree = default_project();
        let manifest: serde_json::Value =
            serde_json::from_str(tree.get("package.json").unwrap()).unwrap();
        assert_eq!(manifest["scripts"]["dev"], "vite --host");
    }
}
