use f3d::interp::material::Floats;
use f3d::{CSource, F3dContext, F3dError, ImportSettings, TextureEntry, Tweakables};

const SCENE: &str = r#"
Vtx tri_vtx[4] = {
    {{{ -10, 0, 10 }, 0, { 0, 0 }, { 0xFF, 0x00, 0x00, 0xFF }}},
    {{{ 10, 0, 10 }, 0, { 992, 0 }, { 0x00, 0xFF, 0x00, 0xFF }}},
    {{{ 10, 0, -10 }, 0, { 992, 992 }, { 0x00, 0x00, 0xFF, 0x80 }}},
    {{{ -10, 0, -10 }, 0, { 0, 992 }, { 0xFF, 0xFF, 0xFF, 0xFF }}},
};

Mtx scale2 = {
    0x00020000, 0x00000000, 0x00000002, 0x00000000,
    0x00000000, 0x00020000, 0x00000000, 0x00000001,
    0x00000000, 0x00000000, 0x00000000, 0x00000000,
    0x00000000, 0x00000000, 0x00000000, 0x00000000,
};

Mtx move100 = {
    0x00010000, 0x00000000, 0x00000001, 0x00000000,
    0x00000000, 0x00010000, 0x00640000, 0x00000001,
    0x00000000, 0x00000000, 0x00000000, 0x00000000,
    0x00000000, 0x00000000, 0x00000000, 0x00000000,
};

u16 tlut_pal[] = { 0xF801, 0x07C1, 0x003F, 0xFFFF };

u8 ci_tex[] = { 0x00, 0x01, 0x02, 0x03, 0x03, 0x02, 0x01, 0x00 };

Lights1 scene_lights = gdSPDefLights1(
    0x3F, 0x3F, 0x3F,
    0xFF, 0xFF, 0xFF, 0x28, 0x28, 0x28);

Gfx unlit_dl[] = {
    gsSPClearGeometryMode(G_LIGHTING),
    gsSPVertex(tri_vtx, 3, 0),
    gsDPSetCombineMode(G_CC_SHADE, G_CC_SHADE),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx dedup_dl[] = {
    gsSPClearGeometryMode(G_LIGHTING),
    gsSPVertex(tri_vtx, 4, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsDPSetEnvColor(0xFF, 0xFF, 0xFF, 0xFF),
    gsSP1Triangle(0, 2, 3, 0),
    gsDPSetEnvColor(0xFF, 0xFF, 0xFF, 0xFF),
    gsSP1Triangle(1, 2, 3, 0),
    gsSPEndDisplayList(),
};

Gfx child_dl[] = {
    gsSP2Triangles(0, 1, 2, 0, 0, 2, 3, 0),
    gsSPEndDisplayList(),
};

Gfx tail_dl[] = {
    gsSP1Quadrangle(0, 1, 2, 3, 0),
    gsSPEndDisplayList(),
};

Gfx parent_dl[] = {
    gsSPVertex(&tri_vtx[0], 4, 0),
    gsSPDisplayList(child_dl),
    gsSPBranchList(tail_dl),
    gsSP1Triangle(0, 1, 2, 0),
};

Gfx loop_dl[] = {
    gsSPDisplayList(loop_dl),
    gsSPEndDisplayList(),
};

Gfx open_dl[] = {
    gsSPVertex(tri_vtx, 3, 0),
};

Gfx load_mtx_dl[] = {
    gsSPMatrix(&scale2, G_MTX_MODELVIEW | G_MTX_LOAD | G_MTX_NOPUSH),
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx mul_mtx_dl[] = {
    gsSPMatrix(&scale2, G_MTX_MODELVIEW | G_MTX_LOAD | G_MTX_NOPUSH),
    gsSPMatrix(&move100, G_MTX_MODELVIEW | G_MTX_MUL | G_MTX_NOPUSH),
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx bad_mtx_dl[] = {
    gsSPMatrix(&nowhere, G_MTX_MODELVIEW | G_MTX_LOAD | G_MTX_NOPUSH),
    gsSPEndDisplayList(),
};

Gfx bad_vtx_dl[] = {
    gsSPVertex(tri_vtx, 3, 30),
    gsSPEndDisplayList(),
};

Gfx tolerant_dl[] = {
    gsDPSetEnvColor(0xZZ, 0, 0, 0),
    gsDPSetPrimColor(0),
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx ci_dl[] = {
    gsDPSetTextureLUT(G_TT_RGBA16),
    gsDPLoadTLUT_pal256(tlut_pal),
    gsDPLoadTextureBlock(ci_tex, G_IM_FMT_CI, G_IM_SIZ_8b, 8, 1, 0,
        G_TX_WRAP | G_TX_NOMIRROR, G_TX_WRAP | G_TX_NOMIRROR, 0, 0, G_TX_NOLOD, G_TX_NOLOD),
    gsDPSetCombineMode(G_CC_MODULATERGBA, G_CC_MODULATERGBA),
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx minimal_dl[] = {
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx light8_dl[] = {
    gsSPNumLights(NUMLIGHTS_1),
    gsSPLightColor(LIGHT_8, 0xFF0000FF),
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx wide_tile_dl[] = {
    gsDPSetTile(G_IM_FMT_RGBA, G_IM_SIZ_16b, 0x40000000, 0, G_TX_RENDERTILE, 0,
        G_TX_CLAMP, 5, G_TX_NOLOD, G_TX_CLAMP, 5, G_TX_NOLOD),
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};

Gfx lit_dl[] = {
    gsSPSetLights1(scene_lights),
    gsSPVertex(tri_vtx, 3, 0),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};
"#;

fn context() -> F3dContext<CSource> {
    let settings = ImportSettings::default();
    let source = CSource::new(SCENE, &settings).unwrap();
    F3dContext::new(source, settings)
}

#[test]
fn single_triangle() {
    let mut ctx = context();
    let mesh = ctx.import("unlit_dl").unwrap();

    assert_eq!(mesh.vertices.len(), 3);
    assert_eq!(mesh.triangles.len(), 1);
    assert_eq!(mesh.triangles[0].indices, [0, 1, 2]);
    assert_eq!(mesh.materials.len(), 1);

    let v = &mesh.vertices;
    assert_eq!(v[0].position, [-10.0, 0.0, 10.0]);
    assert_eq!(v[0].color, [1.0, 0.0, 0.0]);
    assert_eq!(v[0].normal, [0.0, 0.0, 0.0]);
    assert_eq!(v[2].alpha, 128.0 / 255.0);
    assert_eq!(mesh.limb_groups["root"], vec![0, 1, 2]);
}

#[test]
fn materials_are_deduplicated() {
    let mut ctx = context();
    let mesh = ctx.import("dedup_dl").unwrap();
    assert_eq!(mesh.triangles.len(), 3);
    assert_eq!(mesh.materials.len(), 2);
    let materials: Vec<usize> = mesh.triangles.iter().map(|t| t.material).collect();
    assert_eq!(materials, vec![0, 1, 1]);
    assert_eq!(mesh.materials[1].env_color, Some(Floats([1.0, 1.0, 1.0, 1.0])));
}

#[test]
fn calls_and_branches() {
    let mut ctx = context();
    let mesh = ctx.import("parent_dl").unwrap();
    // two from child_dl, two from the quad in tail_dl; the triangle after
    // the branch is never reached
    assert_eq!(mesh.triangles.len(), 4);
    assert_eq!(mesh.vertices.len(), 12);
}

#[test]
fn self_call_overflows() {
    let mut ctx = context();
    let err = ctx.import("loop_dl").unwrap_err();
    assert!(matches!(err, F3dError::CallStackOverflow { .. }));
}

#[test]
fn unterminated_list_is_fatal() {
    let mut ctx = context();
    let err = ctx.import("open_dl").unwrap_err();
    assert!(matches!(err, F3dError::Unterminated { ref list } if list == "open_dl"));
}

#[test]
fn missing_list_is_fatal() {
    let mut ctx = context();
    assert!(matches!(ctx.import("nothing_here_dl"), Err(F3dError::MissingDeclaration { .. })));
}

#[test]
fn loaded_matrix() {
    let mut ctx = context();
    let mesh = ctx.import("load_mtx_dl").unwrap();
    assert_eq!(mesh.vertices[0].position, [-20.0, 0.0, 20.0]);
    assert!(mesh.limb_groups.contains_key("&scale2"));
}

#[test]
fn multiplied_matrix_applies_new_matrix_first() {
    let mut ctx = context();
    let mesh = ctx.import("mul_mtx_dl").unwrap();
    // scale2 * (v + 100)
    assert_eq!(mesh.vertices[0].position, [180.0, 0.0, 20.0]);
    assert!(mesh.limb_groups.contains_key("&move100_x_&scale2"));
}

#[test]
fn missing_matrix_is_fatal() {
    let mut ctx = context();
    assert!(matches!(ctx.import("bad_mtx_dl"), Err(F3dError::MissingTransform { .. })));
}

#[test]
fn vertex_buffer_overflow_is_fatal() {
    let mut ctx = context();
    assert!(matches!(ctx.import("bad_vtx_dl"), Err(F3dError::OutOfRange { .. })));
}

#[test]
fn malformed_commands_are_skipped() {
    let mut ctx = context();
    let mesh = ctx.import("tolerant_dl").unwrap();
    assert_eq!(mesh.triangles.len(), 1);
    assert_eq!(mesh.materials[0].env_color, None);
    assert_eq!(mesh.materials[0].prim_color, None);
}

#[test]
fn palette_is_applied_once() {
    let mut ctx = context();
    let mesh = ctx.import("ci_dl").unwrap();

    let mat = &mesh.materials[0];
    assert_eq!(mat.tex[0].image.as_deref(), Some("ci_tex"));
    assert_eq!(mat.tex[0].format, "CI8");
    assert_eq!(mat.tex[0].ci_format, "RGBA16");
    assert!(mat.tex[0].set);

    assert_eq!(mesh.textures["ci_tex"].width, 8);
    assert_eq!(mesh.textures["ci_tex"].height, 1);
    assert!(mesh.textures.contains_key("tlut_pal"));

    let img = match ctx.texture("ci_tex") {
        Some(TextureEntry::Image(img)) => img.clone(),
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(&img.rgba[0..4], &[1.0, 0.0, 0.0, 1.0]);
    assert_eq!(&img.rgba[4..8], &[0.0, 1.0, 0.0, 1.0]);
    assert_eq!(&img.rgba[8..12], &[0.0, 0.0, 1.0, 1.0]);
    assert_eq!(&img.rgba[12..16], &[1.0, 1.0, 1.0, 1.0]);

    // a second import reuses the already-paletted image
    let mesh = ctx.import("ci_dl").unwrap();
    assert_eq!(mesh.materials.len(), 1);
    match ctx.texture("ci_tex") {
        Some(TextureEntry::Image(again)) => assert_eq!(again, &img),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn disabled_textures_become_references() {
    let mut ctx = context();
    ctx.set_tweakables(Tweakables { disable_textures: true, ..Default::default() });
    let mesh = ctx.import("ci_dl").unwrap();
    let slot = &mesh.materials[0].tex[0];
    assert_eq!(slot.image, None);
    assert_eq!(slot.reference.as_deref(), Some("ci_tex"));
    assert_eq!(slot.reference_size, [8, 1]);
    assert_eq!(slot.pal_reference, Some(("tlut_pal".to_string(), 16)));
    assert_eq!(mesh.textures["ci_tex"].height, 0);
}

#[test]
fn lights_are_captured_with_lighting() {
    let mut ctx = context();
    let mesh = ctx.import("lit_dl").unwrap();
    let lights = mesh.materials[0].lights.as_ref().expect("material lights");
    assert_eq!(lights.lights.len(), 1);
    assert_eq!(lights.ambient.0[3], 1.0);
    assert_eq!(lights.lights[0].color, Floats([1.0, 1.0, 1.0]));

    // lit vertices are white with normals from the color bytes
    let v = &mesh.vertices[0];
    assert_eq!(v.color, [1.0, 1.0, 1.0]);
    assert_eq!(v.normal, [-1.0, 0.0, 0.0]);
}

#[test]
fn default_state_triangle() {
    let mut ctx = context();
    let mesh = ctx.import("minimal_dl").unwrap();
    assert_eq!(mesh.vertices.len(), 3);
    assert_eq!(mesh.triangles.len(), 1);
    assert_eq!(mesh.materials.len(), 1);
    assert_eq!(mesh.triangles[0].material, 0);
}

#[test]
fn light_past_the_last_slot_is_skipped() {
    let mut ctx = context();
    let mesh = ctx.import("light8_dl").unwrap();
    assert_eq!(mesh.triangles.len(), 1);
    assert_eq!(mesh.materials.len(), 1);
}

#[test]
fn oversized_tile_line_is_skipped() {
    let mut ctx = context();
    let mesh = ctx.import("wide_tile_dl").unwrap();
    assert_eq!(mesh.triangles.len(), 1);
    assert_eq!(ctx.tiles()[0].line, 0);
}
