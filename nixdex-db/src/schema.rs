// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Schema definitions for the normalized catalog database.

/// Lookup, package, junction, variation, and embedding tables.
pub const SCHEMA_SQL: &str = r#"
create table if not exists licenses (
    license_id         integer primary key,
    short_name         text unique not null,
    full_name          text,
    spdx_id            text,
    url                text,
    is_free            boolean,
    is_redistributable boolean,
    is_deprecated      boolean
);

create table if not exists architectures (
    arch_id integer primary key,
    name    text unique not null
);

create table if not exists maintainers (
    maintainer_id integer primary key,
    name          text,
    email         text,
    github        text,
    github_id     integer,
    unique(name, email, github)
);

create table if not exists packages (
    package_id         text primary key,
    package_name       text not null,
    version            text not null,
    attribute_path     text,
    description        text,
    long_description   text,
    search_text        text,
    homepage           text,
    category           text,
    broken             boolean default 0,
    unfree             boolean default 0,
    available          boolean default 1,
    insecure           boolean default 0,
    unsupported        boolean default 0,
    main_program       text,
    position           text,
    outputs_to_install text,
    last_updated       text,
    content_hash       integer,
    has_embedding      boolean default 0
);

create table if not exists package_licenses (
    package_id text not null,
    license_id integer not null,
    primary key (package_id, license_id),
    foreign key (package_id) references packages(package_id),
    foreign key (license_id) references licenses(license_id)
);

create table if not exists package_architectures (
    package_id text not null,
    arch_id    integer not null,
    primary key (package_id, arch_id),
    foreign key (package_id) references packages(package_id),
    foreign key (arch_id) references architectures(arch_id)
);

create table if not exists package_maintainers (
    package_id    text not null,
    maintainer_id integer not null,
    primary key (package_id, maintainer_id),
    foreign key (package_id) references packages(package_id),
    foreign key (maintainer_id) references maintainers(maintainer_id)
);

create table if not exists package_variations (
    variation_id text primary key,
    package_id   text not null,
    system       text not null,
    drv_path     text,
    outputs      text,
    unique(package_id, system),
    foreign key (package_id) references packages(package_id)
);

create table if not exists embeddings (
    package_id   text primary key,
    content_hash integer not null,
    vector       blob not null,
    foreign key (package_id) references packages(package_id)
);
"#;

/// Performance indexes; junction sides, flag filters, variation lookups.
pub const INDEX_SQL: &str = r#"
create index if not exists idx_package_name on packages(package_name);
create index if not exists idx_category on packages(category);
create index if not exists idx_status on packages(broken, unfree, available);

create index if not exists idx_license_short_name on licenses(short_name);
create index if not exists idx_architecture_name on architectures(name);
create index if not exists idx_maintainer_name on maintainers(name);
create index if not exists idx_maintainer_email on maintainers(email);
create index if not exists idx_maintainer_github on maintainers(github);

create index if not exists idx_package_licenses_package_id on package_licenses(package_id);
create index if not exists idx_package_licenses_license_id on package_licenses(license_id);
create index if not exists idx_package_architectures_package_id on package_architectures(package_id);
create index if not exists idx_package_architectures_arch_id on package_architectures(arch_id);
create index if not exists idx_package_maintainers_package_id on package_maintainers(package_id);
create index if not exists idx_package_maintainers_maintainer_id on package_maintainers(maintainer_id);

create index if not exists idx_variations_package_id on package_variations(package_id);
create index if not exists idx_variations_system on package_variations(system);
"#;

/// Contentless FTS index over the searchable text columns. Rows are
/// inserted with the rowid of the corresponding packages row.
pub fn fts_table_sql(tokenizer: &str) -> String {
    format!(
        r#"
create virtual table if not exists packages_fts using fts5(
    package_id,
    package_name,
    attribute_path,
    description,
    long_description,
    main_program,
    content='',
    tokenize='{tokenizer}'
);
"#
    )
}
