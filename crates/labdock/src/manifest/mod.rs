//! Deployment manifests.
//!
//! A [`Manifest`] describes every service of one project deployment. It is
//! regenerated from scratch on each deploy, with fresh database credentials,
//! and rendered to a compose file by [`Manifest::to_yaml`].

pub mod naming;
mod render;

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};

use crate::config::{ImagesConfig, RoutingConfig, RuntimeConfig};
use crate::detect::{Detection, Runtime};
use crate::error::RuntimeError;
use crate::secrets::generate_credential;

pub use naming::{slugify, ProjectNames};

/// Port the database listens on inside the project network.
pub const DATABASE_PORT: u16 = 3306;

/// Mount point the database image executes init scripts from.
const INIT_DIR: &str = "/docker-entrypoint-initdb.d";

#[derive(Debug, Clone, Default)]
pub struct ManifestSettings {
    pub routing: RoutingConfig,
    pub images: ImagesConfig,
}

impl From<&RuntimeConfig> for ManifestSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            routing: config.routing.clone(),
            images: config.images.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Workload,
    Database,
    DatabaseAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSource {
    Image(String),
    /// Build context relative to the workspace.
    Build(String),
}

#[derive(Debug)]
pub enum EnvValue {
    Plain(String),
    Secret(SecretString),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}

#[derive(Debug)]
pub struct Service {
    /// Key under `services:` (`web`, `app`, `db`, `admin`).
    pub key: String,
    pub role: ServiceRole,
    pub container_name: String,
    pub source: ServiceSource,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub environment: Vec<(String, EnvValue)>,
    /// Routed hostname; `None` for services the proxy never reaches.
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
    pub labels: Vec<(String, String)>,
    pub healthcheck: Option<HealthCheck>,
    /// Services that must report healthy first.
    pub depends_on_healthy: Vec<String>,
}

impl Service {
    fn new(key: &str, role: ServiceRole, names: &ProjectNames, source: ServiceSource) -> Self {
        Self {
            key: key.to_string(),
            role,
            container_name: names.container(key),
            source,
            command: None,
            working_dir: None,
            environment: Vec::new(),
            hostname: None,
            port: None,
            volumes: Vec::new(),
            networks: vec![names.network.clone()],
            labels: Vec::new(),
            healthcheck: None,
            depends_on_healthy: Vec::new(),
        }
    }

    fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.environment
            .push((key.to_string(), EnvValue::Plain(value.into())));
        self
    }

    fn secret_env(mut self, key: &str, value: &SecretString) -> Self {
        self.environment
            .push((key.to_string(), EnvValue::Secret(SecretString::from(value.expose_secret()))));
        self
    }

    /// Exposes the service through the reverse proxy at `hostname`.
    fn routed(mut self, names: &ProjectNames, routing: &RoutingConfig, hostname: String, port: u16) -> Self {
        let router = names.router(&self.key);
        self.labels = vec![
            ("traefik.enable".to_string(), "true".to_string()),
            (
                "traefik.docker.network".to_string(),
                routing.proxy_network.clone(),
            ),
            (
                format!("traefik.http.routers.{}.rule", router),
                format!("Host(`{}`)", hostname),
            ),
            (
                format!("traefik.http.routers.{}.entrypoints", router),
                routing.entrypoint.clone(),
            ),
            (
                format!("traefik.http.services.{}.loadbalancer.server.port", router),
                port.to_string(),
            ),
        ];
        self.networks.push(routing.proxy_network.clone());
        self.hostname = Some(hostname);
        self.port = Some(port);
        self
    }

    pub fn is_routed(&self) -> bool {
        self.hostname.is_some()
    }
}

#[derive(Debug)]
pub struct Manifest {
    pub names: ProjectNames,
    pub services: Vec<Service>,
    /// External network shared with the reverse proxy.
    pub proxy_network: String,
    /// Named volumes owned by this project.
    pub volumes: Vec<String>,
    pub url: String,
    pub admin_url: Option<String>,
}

impl Manifest {
    pub fn compose_project(&self) -> &str {
        &self.names.compose_project
    }

    pub fn service(&self, key: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.key == key)
    }

    /// The service whose liveness decides whether the deployment is up.
    pub fn workload(&self) -> Option<&Service> {
        self.services.iter().find(|s| s.role == ServiceRole::Workload)
    }

    pub fn hostnames(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter_map(|s| s.hostname.as_deref())
            .collect()
    }
}

/// Service key of the workload container for a detection result.
pub fn workload_key(detection: &Detection) -> &'static str {
    match detection {
        Detection::Static => "web",
        Detection::Application { .. } => "app",
    }
}

pub fn generate(
    project_id: &str,
    detection: &Detection,
    settings: &ManifestSettings,
) -> Result<Manifest, RuntimeError> {
    let names = ProjectNames::derive(project_id)?;
    let routing = &settings.routing;
    let images = &settings.images;
    let host = names.host(&routing.base_domain);
    let url = format!("{}://{}", routing.scheme, host);

    let manifest = match detection {
        Detection::Static => {
            let mut web = Service::new(
                "web",
                ServiceRole::Workload,
                &names,
                ServiceSource::Image(images.static_server.clone()),
            )
            .routed(&names, routing, host, 80);
            web.volumes
                .push("./code:/usr/share/nginx/html:ro".to_string());

            Manifest {
                services: vec![web],
                proxy_network: routing.proxy_network.clone(),
                volumes: Vec::new(),
                url,
                admin_url: None,
                names,
            }
        }
        Detection::Application {
            runtime,
            listen_port,
            db_init,
        } => {
            let password = credential()?;
            let root_password = credential()?;

            let app = workload_service(&names, images, *runtime, *listen_port)
                .env("DB_HOST", "db")
                .env("DB_PORT", DATABASE_PORT.to_string())
                .env("DB_NAME", names.database.clone())
                .env("DB_USER", names.db_user.clone())
                .secret_env("DB_PASSWORD", &password)
                .routed(&names, routing, host, *listen_port);
            let app = Service {
                depends_on_healthy: vec!["db".to_string()],
                ..app
            };

            let mut db = Service::new(
                "db",
                ServiceRole::Database,
                &names,
                ServiceSource::Image(images.database.clone()),
            )
            .env("MYSQL_DATABASE", names.database.clone())
            .env("MYSQL_USER", names.db_user.clone())
            .secret_env("MYSQL_PASSWORD", &password)
            .secret_env("MYSQL_ROOT_PASSWORD", &root_password);
            db.volumes.push(format!("{}:/var/lib/mysql", names.volume));
            if let Some(script) = db_init {
                db.volumes.push(init_mount(script));
            }
            db.healthcheck = Some(HealthCheck {
                test: vec![
                    "CMD".to_string(),
                    "mysqladmin".to_string(),
                    "ping".to_string(),
                    "-h".to_string(),
                    "localhost".to_string(),
                ],
                interval: "5s".to_string(),
                timeout: "5s".to_string(),
                retries: 20,
                start_period: "10s".to_string(),
            });

            let admin_host = names.admin_host(&routing.base_domain);
            let admin_url = format!("{}://{}", routing.scheme, admin_host);
            let admin = Service::new(
                "admin",
                ServiceRole::DatabaseAdmin,
                &names,
                ServiceSource::Image(images.database_admin.clone()),
            )
            .env("PMA_HOST", "db")
            .env("PMA_PORT", DATABASE_PORT.to_string())
            .routed(&names, routing, admin_host, 80);
            let admin = Service {
                depends_on_healthy: vec!["db".to_string()],
                ..admin
            };

            Manifest {
                services: vec![app, db, admin],
                proxy_network: routing.proxy_network.clone(),
                volumes: vec![names.volume.clone()],
                url,
                admin_url: Some(admin_url),
                names,
            }
        }
    };

    Ok(manifest)
}

fn credential() -> Result<SecretString, RuntimeError> {
    generate_credential().map_err(|e| RuntimeError::Configuration(e.to_string()))
}

fn workload_service(names: &ProjectNames, images: &ImagesConfig, runtime: Runtime, port: u16) -> Service {
    let image = |name: &String| ServiceSource::Image(name.clone());
    match runtime {
        Runtime::Dockerfile => Service::new(
            "app",
            ServiceRole::Workload,
            names,
            ServiceSource::Build("./code".to_string()),
        ),
        Runtime::Node => {
            let mut app = Service::new("app", ServiceRole::Workload, names, image(&images.node))
                .env("PORT", port.to_string());
            app.working_dir = Some("/app".to_string());
            app.volumes.push("./code:/app".to_string());
            app.command = Some(shell("npm install && npm start"));
            app
        }
        Runtime::Php => {
            let mut app = Service::new("app", ServiceRole::Workload, names, image(&images.php));
            app.volumes.push("./code:/var/www/html".to_string());
            app
        }
        Runtime::Python => {
            let mut app = Service::new("app", ServiceRole::Workload, names, image(&images.python))
                .env("PORT", port.to_string());
            app.working_dir = Some("/app".to_string());
            app.volumes.push("./code:/app".to_string());
            app.command = Some(shell(
                "pip install --no-cache-dir -r requirements.txt && python app.py",
            ));
            app
        }
    }
}

fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn init_mount(script: &Path) -> String {
    let relative = script.to_string_lossy().replace('\\', "/");
    format!("./code/{}:{}/01-init.sql:ro", relative, INIT_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn settings() -> ManifestSettings {
        ManifestSettings {
            routing: RoutingConfig {
                base_domain: "labs.test".to_string(),
                ..Default::default()
            },
            images: ImagesConfig::default(),
        }
    }

    fn node_with_db() -> Detection {
        Detection::Application {
            runtime: Runtime::Node,
            listen_port: 3000,
            db_init: Some(PathBuf::from("db.sql")),
        }
    }

    #[test]
    fn test_static_manifest_single_routed_service() {
        let manifest = generate("proj-1", &Detection::Static, &settings()).unwrap();

        assert_eq!(manifest.services.len(), 1);
        let web = &manifest.services[0];
        assert_eq!(web.key, "web");
        assert_eq!(web.container_name, "proj1-web");
        assert_eq!(web.hostname.as_deref(), Some("proj1.labs.test"));
        assert!(web.volumes.iter().any(|v| v.ends_with(":ro")));
        assert_eq!(manifest.url, "http://proj1.labs.test");
        assert!(manifest.admin_url.is_none());
        assert!(manifest.volumes.is_empty());
    }

    #[test]
    fn test_application_manifest_topology() {
        let manifest = generate("proj-2", &node_with_db(), &settings()).unwrap();

        let keys: Vec<_> = manifest.services.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["app", "db", "admin"]);
        for service in &manifest.services {
            assert!(service.networks.contains(&"proj2-net".to_string()));
        }

        let db = manifest.service("db").unwrap();
        assert!(!db.is_routed());
        assert!(!db.networks.contains(&manifest.proxy_network));
        assert!(db.labels.is_empty());
        assert!(db.healthcheck.is_some());
        assert!(db
            .volumes
            .iter()
            .any(|v| v == "./code/db.sql:/docker-entrypoint-initdb.d/01-init.sql:ro"));

        let app = manifest.service("app").unwrap();
        assert_eq!(app.depends_on_healthy, vec!["db".to_string()]);
        assert!(app.networks.contains(&manifest.proxy_network));

        assert_eq!(
            manifest.admin_url.as_deref(),
            Some("http://proj2-admin.labs.test")
        );
    }

    #[test]
    fn test_dockerfile_workload_is_built() {
        let detection = Detection::Application {
            runtime: Runtime::Dockerfile,
            listen_port: 8080,
            db_init: None,
        };
        let manifest = generate("p3", &detection, &settings()).unwrap();
        let app = manifest.workload().unwrap();
        assert_eq!(app.source, ServiceSource::Build("./code".to_string()));
        assert_eq!(app.port, Some(8080));
        let db = manifest.service("db").unwrap();
        assert_eq!(db.volumes.len(), 1);
    }

    #[test]
    fn test_names_do_not_overlap_between_projects() {
        let a = generate("alpha-1", &node_with_db(), &settings()).unwrap();
        let b = generate("beta-2", &node_with_db(), &settings()).unwrap();

        let hosts_a: HashSet<_> = a.hostnames().into_iter().collect();
        assert!(b.hostnames().iter().all(|h| !hosts_a.contains(h)));
        assert_ne!(a.names.network, b.names.network);
        assert_ne!(a.names.database, b.names.database);
        assert_ne!(a.compose_project(), b.compose_project());
    }

    #[test]
    fn test_credentials_fresh_per_generation() {
        let password = |m: &Manifest| {
            m.service("db")
                .unwrap()
                .environment
                .iter()
                .find_map(|(k, v)| match (k.as_str(), v) {
                    ("MYSQL_PASSWORD", EnvValue::Secret(s)) => Some(s.expose_secret().to_string()),
                    _ => None,
                })
                .unwrap()
        };
        let first = generate("p4", &node_with_db(), &settings()).unwrap();
        let second = generate("p4", &node_with_db(), &settings()).unwrap();
        assert_ne!(password(&first), password(&second));
        assert_eq!(password(&first).len(), 32);
    }
}
